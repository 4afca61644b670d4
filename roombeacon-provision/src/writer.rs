use roombeacon_proto::ble::{encode_minor_id, encode_text};
use roombeacon_proto::{MinorId, Role, RoomPreset};
use uuid::Uuid;

use crate::central::Central;
use crate::error::ProvisionError;
use crate::machine::Provisioner;
use crate::resolver::GattStage;
use crate::state::ProvisioningState;
use crate::timer::Scheduler;

/// Network credentials and room assignment for one beacon
#[derive(Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub ssid: String,
    pub password: String,
    pub room_name: String,
    pub minor_id: MinorId,
}

impl std::fmt::Debug for ProvisionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionRequest")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .field("room_name", &self.room_name)
            .field("minor_id", &self.minor_id)
            .finish()
    }
}

impl ProvisionRequest {
    pub fn new(
        ssid: impl Into<String>,
        password: impl Into<String>,
        room_name: impl Into<String>,
        minor_id: MinorId,
    ) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
            room_name: room_name.into(),
            minor_id,
        }
    }

    pub fn from_preset(
        ssid: impl Into<String>,
        password: impl Into<String>,
        preset: &RoomPreset,
    ) -> Self {
        Self::new(ssid, password, preset.name, preset.minor_id)
    }

    /// Wire value for one of the configuration characteristics
    pub fn payload(&self, role: Role) -> Option<Vec<u8>> {
        match role {
            Role::Ssid => Some(encode_text(&self.ssid)),
            Role::Password => Some(encode_text(&self.password)),
            Role::RoomName => Some(encode_text(&self.room_name)),
            Role::MinorId => Some(encode_minor_id(self.minor_id).to_vec()),
            Role::Command | Role::Status => None,
        }
    }
}

/// Configuration writes issued and acknowledged in the current attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteProgress {
    pending: usize,
    completed: usize,
    /// Bit per role, set once its write is acknowledged
    acknowledged: u8,
}

impl WriteProgress {
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn issue(&mut self) {
        self.pending += 1;
    }

    /// Count the acknowledgment of `role`. False for a repeat, or if every
    /// issued write is already accounted for.
    pub(crate) fn complete(&mut self, role: Role) -> bool {
        let bit = 1u8 << role.index();
        if self.acknowledged & bit != 0 || self.completed >= self.pending {
            return false;
        }
        self.acknowledged |= bit;
        self.completed += 1;
        true
    }

    pub fn is_complete(&self) -> bool {
        self.pending > 0 && self.completed == self.pending
    }
}

impl std::fmt::Display for WriteProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.completed, self.pending)
    }
}

impl<C: Central, S: Scheduler> Provisioner<C, S> {
    /// Write the configuration to the connected beacon. Every configuration
    /// characteristic the beacon exposes is written; the save command follows
    /// once all of them are acknowledged.
    pub fn provision(&mut self, request: ProvisionRequest) {
        if matches!(
            self.state,
            ProvisioningState::Writing | ProvisioningState::Saving
        ) {
            self.log.log("provision request ignored, already provisioning");
            return;
        }
        let connected = self.gatt == GattStage::Resolved
            && matches!(
                self.state,
                ProvisioningState::Ready | ProvisioningState::DiscoveringServices
            );
        let Some(id) = self.target_id().filter(|_| connected) else {
            self.fail(ProvisionError::NotConnected);
            return;
        };

        self.progress.reset();
        self.save_issued = false;
        self.log.log_detail(
            "provision requested",
            format!(
                "ssid {:?}, room {:?}, minor {}",
                request.ssid, request.room_name, request.minor_id
            ),
        );
        self.set_state(ProvisioningState::Writing);

        for role in Role::CONFIGURATION {
            let Some(characteristic) = self.characteristics.get(role) else {
                self.log
                    .log_detail("write skipped", format!("beacon has no {role} characteristic"));
                continue;
            };
            let Some(value) = request.payload(role) else {
                continue;
            };
            self.log.log_detail("write issued", format!("{role} ({} bytes)", value.len()));
            self.progress.issue();
            self.central.write(&id, characteristic, value);
        }
        self.request = Some(request);

        if self.progress.pending() == 0 {
            self.fail(ProvisionError::NothingToWrite);
        }
    }

    pub(crate) fn on_write_completed(
        &mut self,
        id: &str,
        characteristic: Uuid,
        result: Result<(), String>,
    ) {
        if !self.is_target(id) {
            return;
        }
        let role = self.characteristics.role_of(characteristic);

        if role == Some(Role::Command) {
            self.on_save_written(result);
            return;
        }
        let Some(role) = role.filter(|role| Role::CONFIGURATION.contains(role)) else {
            self.log.log_detail("write acknowledgment ignored", characteristic.to_string());
            return;
        };
        if self.state != ProvisioningState::Writing {
            self.log.log_detail("late write acknowledgment ignored", role.as_str());
            return;
        }

        if let Err(message) = result {
            self.fail(ProvisionError::WriteFailure { role, message });
            return;
        }
        if !self.progress.complete(role) {
            log::warn!("unexpected write acknowledgment for {role}");
            self.log.log_detail("surplus write acknowledgment ignored", role.as_str());
            return;
        }
        self.log.log_detail("write acknowledged", format!("{role} {}", self.progress));

        if self.progress.is_complete() {
            self.send_save();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roombeacon_proto::find_preset;

    #[test]
    fn payloads_follow_the_wire_format() {
        let office = find_preset("office").unwrap();
        let request = ProvisionRequest::from_preset("Lab", "s3cret", office);

        assert_eq!(request.payload(Role::Ssid), Some(b"Lab".to_vec()));
        assert_eq!(request.payload(Role::Password), Some(b"s3cret".to_vec()));
        assert_eq!(request.payload(Role::RoomName), Some(b"Office".to_vec()));
        assert_eq!(request.payload(Role::MinorId), Some(vec![0x00, 0x04]));
        assert_eq!(request.payload(Role::Command), None);
    }

    #[test]
    fn large_minor_id_is_big_endian() {
        let request = ProvisionRequest::new("a", "b", "Attic", MinorId::new(0x1234).unwrap());
        assert_eq!(request.payload(Role::MinorId), Some(vec![0x12, 0x34]));
    }

    #[test]
    fn empty_strings_are_written_as_empty_payloads() {
        let request = ProvisionRequest::new("", "", "", MinorId::new(1).unwrap());
        assert_eq!(request.payload(Role::Password), Some(Vec::new()));
    }

    #[test]
    fn debug_redacts_password() {
        let request = ProvisionRequest::new("Lab", "hunter2", "Office", MinorId::new(4).unwrap());
        let text = format!("{request:?}");
        assert!(!text.contains("hunter2"));
        assert!(text.contains("Lab"));
    }

    #[test]
    fn progress_never_overruns() {
        let mut progress = WriteProgress::default();
        progress.issue();
        progress.issue();
        assert!(!progress.is_complete());

        assert!(progress.complete(Role::Ssid));
        // a repeated ack is not a second write
        assert!(!progress.complete(Role::Ssid));
        assert!(progress.complete(Role::Password));
        assert!(!progress.complete(Role::RoomName));

        assert!(progress.is_complete());
        assert_eq!(progress.to_string(), "2/2");
        assert!(!WriteProgress::default().is_complete());
    }
}
