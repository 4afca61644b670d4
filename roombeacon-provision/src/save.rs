use roombeacon_proto::ble::{commands, encode_text};
use roombeacon_proto::{MinorId, Role, StatusUpdate};
use uuid::Uuid;

use crate::central::{Central, PeripheralId};
use crate::error::ProvisionError;
use crate::machine::Provisioner;
use crate::resolver::GattStage;
use crate::state::ProvisioningState;
use crate::timer::{Phase, Scheduler};

/// A beacon that confirmed its configuration during this session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedDevice {
    pub id: PeripheralId,
    pub name: String,
    pub room_name: String,
    pub minor_id: MinorId,
    pub provisioned_at: chrono::DateTime<chrono::Local>,
}

impl<C: Central, S: Scheduler> Provisioner<C, S> {
    /// Ask the beacon to persist what was written. Issued at most once per
    /// provisioning attempt.
    pub(crate) fn send_save(&mut self) {
        if self.save_issued {
            return;
        }
        let Some(id) = self.target_id() else {
            self.fail(ProvisionError::NotConnected);
            return;
        };
        let Some(command) = self.characteristics.get(Role::Command) else {
            self.fail(ProvisionError::MissingCharacteristic(Role::Command));
            return;
        };
        let Some(status) = self.characteristics.get(Role::Status) else {
            self.fail(ProvisionError::MissingCharacteristic(Role::Status));
            return;
        };

        if !self.status_subscribed {
            self.log.log("resubscribing to status before save");
            self.central.subscribe(&id, status);
            self.status_subscribed = true;
        }

        self.save_issued = true;
        self.set_state(ProvisioningState::Saving);
        self.central
            .write(&id, command, encode_text(commands::SAVE));
        self.log.log("save command sent");
        self.timers
            .arm(&mut self.scheduler, Phase::Save, self.config.save_timeout());
    }

    /// Acknowledgment of the save command write itself
    pub(crate) fn on_save_written(&mut self, result: Result<(), String>) {
        match result {
            Ok(()) => self.log.log("save command acknowledged"),
            Err(message) if self.state == ProvisioningState::Saving => {
                self.fail(ProvisionError::WriteFailure {
                    role: Role::Command,
                    message,
                });
            }
            Err(message) => self.log.log_detail("late save failure ignored", message),
        }
    }

    pub(crate) fn on_value(&mut self, id: &str, characteristic: Uuid, value: &[u8]) {
        if !self.is_target(id) {
            return;
        }
        if self.characteristics.get(Role::Status) != Some(characteristic) {
            self.log.log_detail("value ignored", characteristic.to_string());
            return;
        }

        let Some(update) = StatusUpdate::parse(value) else {
            self.log.log_detail("status ignored", format!("{} bytes, not UTF-8", value.len()));
            return;
        };

        match update {
            StatusUpdate::Ready => self.on_ready(),
            StatusUpdate::Saved => self.on_saved(),
            StatusUpdate::Error(message) => {
                self.log.log_detail("status", message.as_str());
                if self.state.is_connection_active() {
                    self.fail(ProvisionError::PeripheralReported(message));
                }
            }
            StatusUpdate::Other(text) => {
                self.log.log_detail("unrecognized status ignored", text);
            }
        }
    }

    fn on_ready(&mut self) {
        self.log.log_detail("status", "ready");
        match self.state {
            ProvisioningState::DiscoveringServices if self.gatt == GattStage::Resolved => {
                self.set_state(ProvisioningState::Ready);
            }
            ProvisioningState::Ready => {}
            _ => self.log.log("ready status ignored"),
        }
    }

    fn on_saved(&mut self) {
        self.log.log_detail("status", "saved");
        if self.state != ProvisioningState::Saving {
            self.log.log("saved status ignored");
            return;
        }
        self.timers.disarm(&mut self.scheduler, Phase::Save);

        if let (Some(target), Some(request)) = (&self.target, &self.request) {
            log::info!(
                "beacon {} saved room {:?} (minor {})",
                target.id,
                request.room_name,
                request.minor_id
            );
            self.provisioned.push(ProvisionedDevice {
                id: target.id.clone(),
                name: target.name.clone(),
                room_name: request.room_name.clone(),
                minor_id: request.minor_id,
                provisioned_at: chrono::Local::now(),
            });
        }
        self.set_state(ProvisioningState::Saved);
    }

    pub(crate) fn on_save_timeout(&mut self) {
        if self.state == ProvisioningState::Saving {
            self.fail(ProvisionError::SaveTimeout(self.config.save_timeout_secs));
        }
    }
}

#[cfg(test)]
mod tests {
    use roombeacon_proto::ble::{COMMAND_UUID, STATUS_UUID};

    use super::*;
    use crate::central::Event;
    use crate::machine::tests::{
        ID, ack_configuration, all_characteristics, connected, kitchen, provisioner, ready,
        resolved_with, status,
    };

    #[test]
    fn multi_line_beacon_error_keeps_one_line_per_entry() {
        let mut p = provisioner();
        ready(&mut p);
        status(&mut p, "error:line one\nline two");

        assert_eq!(p.state(), &ProvisioningState::Error("error:line one\nline two".into()));
        let report = p.export_diagnostic_log();
        assert_eq!(report.lines().count(), p.diagnostics().len() + 1);
        assert!(report.contains(r"line one\nline two"));
    }

    #[test]
    fn save_command_failure_is_terminal() {
        let mut p = provisioner();
        ready(&mut p);
        p.provision(kitchen());
        ack_configuration(&mut p);
        p.handle(Event::WriteCompleted {
            id: ID.into(),
            characteristic: COMMAND_UUID,
            result: Err("unlikely error".into()),
        });

        assert_eq!(
            p.state(),
            &ProvisioningState::Error(
                ProvisionError::WriteFailure {
                    role: Role::Command,
                    message: "unlikely error".into()
                }
                .to_string()
            )
        );
        assert!(p.scheduler.live().is_empty());
    }

    #[test]
    fn missing_command_characteristic_fails_at_save() {
        let mut p = provisioner();
        let mut characteristics = all_characteristics();
        characteristics.retain(|uuid| *uuid != COMMAND_UUID);
        resolved_with(&mut p, characteristics);
        status(&mut p, "ready");
        p.provision(kitchen());
        ack_configuration(&mut p);

        assert_eq!(
            p.state(),
            &ProvisioningState::Error(
                ProvisionError::MissingCharacteristic(Role::Command).to_string()
            )
        );
    }

    #[test]
    fn saved_before_save_is_ignored() {
        let mut p = provisioner();
        ready(&mut p);
        status(&mut p, "saved");
        assert_eq!(p.state(), &ProvisioningState::Ready);

        p.provision(kitchen());
        status(&mut p, "saved");
        assert_eq!(p.state(), &ProvisioningState::Writing);
        assert!(p.provisioned().is_empty());
    }

    #[test]
    fn ready_before_characteristics_is_ignored() {
        let mut p = provisioner();
        connected(&mut p);
        status(&mut p, "ready");
        assert_eq!(p.state(), &ProvisioningState::DiscoveringServices);
    }

    #[test]
    fn status_from_another_peripheral_is_ignored() {
        let mut p = provisioner();
        resolved_with(&mut p, all_characteristics());
        p.handle(Event::ValueUpdated {
            id: "intruder".into(),
            characteristic: STATUS_UUID,
            value: b"ready".to_vec(),
        });
        assert_eq!(p.state(), &ProvisioningState::DiscoveringServices);
    }

    #[test]
    fn provisioned_record_is_kept_across_sessions() {
        let mut p = provisioner();
        ready(&mut p);
        p.provision(kitchen());
        ack_configuration(&mut p);
        status(&mut p, "saved");
        p.cancel();

        assert_eq!(p.provisioned().len(), 1);
        assert_eq!(p.provisioned()[0].id, ID);
        assert_eq!(p.provisioned()[0].name, "RoomBeacon");
    }
}
