use roombeacon_proto::ble::SERVICE_UUID;

use crate::central::Central;
use crate::error::ProvisionError;
use crate::machine::Provisioner;
use crate::resolver::GattStage;
use crate::state::ProvisioningState;
use crate::timer::{Phase, Scheduler};

impl<C: Central, S: Scheduler> Provisioner<C, S> {
    /// Connect to a beacon from the discovered list
    pub fn connect(&mut self, id: &str) {
        if self.state.is_connection_active() {
            self.log.log_detail("connect request ignored", format!("state is {}", self.state));
            return;
        }
        let Some(peripheral) = self.discovery.get(id).cloned() else {
            self.fail(ProvisionError::UnknownPeripheral(id.to_string()));
            return;
        };

        self.halt_scan();
        self.release_target();
        self.timers.disarm_all(&mut self.scheduler);
        self.reset_connection_session();

        self.log.log_detail(
            "connect requested",
            format!("{} ({})", peripheral.name, peripheral.id),
        );
        let id = peripheral.id.clone();
        self.target = Some(peripheral);
        self.set_state(ProvisioningState::Connecting);
        self.central.connect(&id);
        self.timers
            .arm(&mut self.scheduler, Phase::Connect, self.config.connect_timeout());
    }

    pub(crate) fn on_connected(&mut self, id: &str) {
        if !self.is_target(id) || self.state != ProvisioningState::Connecting {
            self.log.log_detail("connect completion ignored", id);
            return;
        }
        self.timers.disarm(&mut self.scheduler, Phase::Connect);
        self.log.log_detail("connected", id);

        self.set_state(ProvisioningState::DiscoveringServices);
        self.gatt = GattStage::Services;
        self.timers.arm(
            &mut self.scheduler,
            Phase::ServiceDiscovery,
            self.config.service_discovery_timeout(),
        );
        self.central.discover_services(id, SERVICE_UUID);
    }

    pub(crate) fn on_connect_failed(&mut self, id: &str, error: String) {
        if !self.is_target(id) || self.state != ProvisioningState::Connecting {
            self.log.log_detail("connect failure ignored", error);
            return;
        }
        self.fail(ProvisionError::ConnectFailed(error));
    }

    pub(crate) fn on_connect_timeout(&mut self) {
        if self.state != ProvisioningState::Connecting {
            return;
        }
        self.fail(ProvisionError::ConnectionTimeout(
            self.config.connect_timeout_secs,
        ));
        // the platform would keep trying forever
        self.release_target();
    }

    pub(crate) fn on_disconnected(&mut self, id: &str, reason: Option<String>) {
        if !self.is_target(id) {
            self.log.log_detail("disconnect ignored", id);
            return;
        }
        self.log.log_detail(
            "disconnected",
            reason.clone().unwrap_or_else(|| "no reason given".to_string()),
        );
        self.target = None;

        // a beacon restarts once it has saved its configuration
        if matches!(
            self.state,
            ProvisioningState::Saving | ProvisioningState::Saved
        ) {
            self.timers.disarm_all(&mut self.scheduler);
            self.set_state(ProvisioningState::Disconnected);
        } else if self.state.is_connection_active() {
            self.fail(ProvisionError::UnexpectedDisconnect(reason));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::central::{Event, RadioState};
    use crate::machine::tests::{
        ID, ack_configuration, connected, fire, kitchen, provisioner, ready, scanning, status,
    };
    use crate::mock::Call;

    #[test]
    fn connect_stops_scan_and_arms_timeout() {
        let mut p = provisioner();
        scanning(&mut p);
        p.connect(ID);

        assert_eq!(p.state(), &ProvisioningState::Connecting);
        assert_eq!(
            p.central.calls,
            vec![Call::StartScan, Call::StopScan, Call::Connect(ID.into())]
        );
        let (_, phase, after) = p.scheduler.scheduled[0];
        assert_eq!(phase, Phase::Connect);
        assert_eq!(after.as_secs(), 15);
    }

    #[test]
    fn connected_starts_scoped_service_discovery() {
        let mut p = provisioner();
        connected(&mut p);

        assert_eq!(p.state(), &ProvisioningState::DiscoveringServices);
        assert_eq!(
            p.central.calls.last(),
            Some(&Call::DiscoverServices(ID.into(), SERVICE_UUID))
        );
        let connect = p.scheduler.latest(Phase::Connect).unwrap();
        assert!(p.scheduler.is_cancelled(connect));
        assert!(p.scheduler.latest(Phase::ServiceDiscovery).is_some());
    }

    #[test]
    fn unknown_peripheral_is_an_error() {
        let mut p = provisioner();
        scanning(&mut p);
        p.connect("not-a-beacon");

        assert_eq!(
            p.state(),
            &ProvisioningState::Error(
                ProvisionError::UnknownPeripheral("not-a-beacon".into()).to_string()
            )
        );
        assert_eq!(p.central.count(|c| matches!(c, Call::Connect(_))), 0);
    }

    #[test]
    fn connect_timeout_cancels_the_attempt() {
        let mut p = provisioner();
        scanning(&mut p);
        p.connect(ID);
        fire(&mut p, Phase::Connect);

        assert_eq!(
            p.state(),
            &ProvisioningState::Error(ProvisionError::ConnectionTimeout(15).to_string())
        );
        assert!(p.state().to_string().contains("power-cycle"));
        assert_eq!(p.central.calls.last(), Some(&Call::CancelConnection(ID.into())));

        // the platform reports the connection after all; too late
        p.handle(Event::Connected { id: ID.into() });
        assert!(p.state().is_terminal());
        assert_eq!(p.central.count(|c| matches!(c, Call::DiscoverServices(..))), 0);
    }

    #[test]
    fn stale_connect_timer_is_ignored() {
        let mut p = provisioner();
        connected(&mut p);
        // expiry was already queued when the connection completed
        fire(&mut p, Phase::Connect);
        assert_eq!(p.state(), &ProvisioningState::DiscoveringServices);
    }

    #[test]
    fn connect_failure() {
        let mut p = provisioner();
        scanning(&mut p);
        p.connect(ID);
        p.handle(Event::ConnectFailed {
            id: ID.into(),
            error: "peer removed pairing".into(),
        });

        assert_eq!(
            p.state(),
            &ProvisioningState::Error(
                ProvisionError::ConnectFailed("peer removed pairing".into()).to_string()
            )
        );
        assert!(p.scheduler.live().is_empty());
    }

    #[test]
    fn unexpected_disconnect_mid_flow() {
        let mut p = provisioner();
        ready(&mut p);
        p.provision(kitchen());
        p.handle(Event::Disconnected {
            id: ID.into(),
            reason: Some("link loss".into()),
        });

        assert_eq!(
            p.state(),
            &ProvisioningState::Error(
                ProvisionError::UnexpectedDisconnect(Some("link loss".into())).to_string()
            )
        );
    }

    #[test]
    fn disconnect_while_saving_is_expected() {
        let mut p = provisioner();
        ready(&mut p);
        p.provision(kitchen());
        ack_configuration(&mut p);
        p.handle(Event::Disconnected {
            id: ID.into(),
            reason: None,
        });

        assert_eq!(p.state(), &ProvisioningState::Disconnected);
        assert!(p.scheduler.live().is_empty());
        // a save timer that was already queued must not resurrect the flow
        fire(&mut p, Phase::Save);
        assert_eq!(p.state(), &ProvisioningState::Disconnected);
    }

    #[test]
    fn disconnect_of_another_peripheral_is_ignored() {
        let mut p = provisioner();
        connected(&mut p);
        p.handle(Event::Disconnected {
            id: "someone-else".into(),
            reason: None,
        });
        assert_eq!(p.state(), &ProvisioningState::DiscoveringServices);
    }

    #[test]
    fn disconnect_after_error_keeps_the_error() {
        let mut p = provisioner();
        ready(&mut p);
        status(&mut p, "error:wifi_rejected");
        p.handle(Event::Disconnected {
            id: ID.into(),
            reason: None,
        });
        assert_eq!(p.state(), &ProvisioningState::Error("error:wifi_rejected".into()));
    }

    #[test]
    fn connect_while_connecting_is_ignored() {
        let mut p = provisioner();
        p.handle(Event::RadioStateChanged(RadioState::PoweredOn));
        p.start_scanning();
        for id in ["a", "b"] {
            p.handle(Event::Discovered {
                id: id.into(),
                name: "RoomBeacon".into(),
                rssi: None,
            });
        }
        p.connect("a");
        p.connect("b");

        assert_eq!(p.central.count(|c| matches!(c, Call::Connect(_))), 1);
        assert_eq!(p.scheduler.live().len(), 1);
    }
}
