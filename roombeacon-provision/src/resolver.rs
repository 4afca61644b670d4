//! Service and characteristic discovery on a connected beacon

use roombeacon_proto::Role;
use roombeacon_proto::ble::SERVICE_UUID;
use uuid::Uuid;

use crate::central::Central;
use crate::error::ProvisionError;
use crate::machine::Provisioner;
use crate::state::ProvisioningState;
use crate::timer::{Phase, Scheduler};

/// Where GATT discovery currently stands on the connected beacon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum GattStage {
    #[default]
    Idle,
    Services,
    Characteristics,
    Resolved,
}

/// Characteristics found on the beacon, by role. Absent roles are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacteristicMap {
    slots: [Option<Uuid>; Role::ALL.len()],
}

impl CharacteristicMap {
    /// Sort discovered UUIDs into roles; the rest are returned as unknown
    pub fn resolve(discovered: &[Uuid]) -> (Self, Vec<Uuid>) {
        let mut map = Self::default();
        let mut unknown = Vec::new();
        for uuid in discovered {
            match Role::from_uuid(*uuid) {
                Some(role) => map.slots[role.index()] = Some(*uuid),
                None => unknown.push(*uuid),
            }
        }
        (map, unknown)
    }

    pub fn get(&self, role: Role) -> Option<Uuid> {
        self.slots[role.index()]
    }

    pub fn contains(&self, role: Role) -> bool {
        self.get(role).is_some()
    }

    pub fn role_of(&self, characteristic: Uuid) -> Option<Role> {
        Role::ALL
            .into_iter()
            .find(|role| self.get(*role) == Some(characteristic))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Roles that were found, in protocol order
    pub fn roles(&self) -> impl Iterator<Item = Role> + '_ {
        Role::ALL.into_iter().filter(|role| self.contains(*role))
    }
}

impl<C: Central, S: Scheduler> Provisioner<C, S> {
    fn in_discovery(&self, id: &str, stage: GattStage) -> bool {
        self.is_target(id)
            && self.state == ProvisioningState::DiscoveringServices
            && self.gatt == stage
    }

    pub(crate) fn on_services(&mut self, id: &str, result: Result<Vec<Uuid>, String>) {
        if !self.in_discovery(id, GattStage::Services) {
            self.log.log_detail("service discovery result ignored", id);
            return;
        }
        self.timers.disarm(&mut self.scheduler, Phase::ServiceDiscovery);

        let services = match result {
            Ok(services) => services,
            Err(error) => {
                self.fail(ProvisionError::ServiceDiscoveryFailed(error));
                return;
            }
        };
        let listed = services
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        self.log.log_detail("services discovered", listed);

        if !services.contains(&SERVICE_UUID) {
            self.fail(ProvisionError::ServiceNotFound {
                expected: SERVICE_UUID,
                found: services,
            });
            return;
        }

        self.gatt = GattStage::Characteristics;
        self.timers.arm(
            &mut self.scheduler,
            Phase::CharacteristicDiscovery,
            self.config.characteristic_discovery_timeout(),
        );
        let wanted: Vec<Uuid> = Role::ALL.iter().map(|role| role.uuid()).collect();
        self.central.discover_characteristics(id, SERVICE_UUID, &wanted);
    }

    pub(crate) fn on_characteristics(
        &mut self,
        id: &str,
        service: Uuid,
        result: Result<Vec<Uuid>, String>,
    ) {
        if service != SERVICE_UUID || !self.in_discovery(id, GattStage::Characteristics) {
            self.log
                .log_detail("characteristic discovery result ignored", format!("{id} {service}"));
            return;
        }
        self.timers
            .disarm(&mut self.scheduler, Phase::CharacteristicDiscovery);

        let discovered = match result {
            Ok(discovered) => discovered,
            Err(error) => {
                self.fail(ProvisionError::CharacteristicDiscoveryFailed(error));
                return;
            }
        };
        let (map, unknown) = CharacteristicMap::resolve(&discovered);
        let roles = map.roles().map(Role::as_str).collect::<Vec<_>>().join(", ");
        self.log.log_detail("characteristics discovered", roles);
        for uuid in unknown {
            self.log.log_detail("unknown characteristic ignored", uuid.to_string());
        }
        self.characteristics = map;
        self.gatt = GattStage::Resolved;

        let Some(status) = self.characteristics.get(Role::Status) else {
            self.fail(ProvisionError::MissingCharacteristic(Role::Status));
            return;
        };
        // readiness is decided by the beacon, via notification or this read
        self.central.subscribe(id, status);
        self.status_subscribed = true;
        self.central.read(id, status);
        self.log.log("waiting for beacon to report ready");
    }

    pub(crate) fn on_subscribe_failed(&mut self, id: &str, characteristic: Uuid, error: String) {
        if !self.is_target(id) {
            return;
        }
        if Some(characteristic) == self.characteristics.get(Role::Status) {
            self.status_subscribed = false;
        }
        log::warn!("subscribe to {characteristic} failed: {error}");
        self.log.log_detail("status subscription failed", error);
    }

    pub(crate) fn on_service_discovery_timeout(&mut self) {
        if self.state == ProvisioningState::DiscoveringServices
            && self.gatt == GattStage::Services
        {
            self.fail(ProvisionError::ServiceDiscoveryTimeout(
                self.config.service_discovery_timeout_secs,
            ));
        }
    }

    pub(crate) fn on_characteristic_discovery_timeout(&mut self) {
        if self.state == ProvisioningState::DiscoveringServices
            && self.gatt == GattStage::Characteristics
        {
            self.fail(ProvisionError::CharacteristicDiscoveryTimeout(
                self.config.characteristic_discovery_timeout_secs,
            ));
        }
    }
}
