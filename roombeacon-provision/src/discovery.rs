//! Scanning and the list of unprovisioned beacons seen so far

use crate::central::{Central, PeripheralId, RadioState};
use crate::error::ProvisionError;
use crate::machine::Provisioner;
use crate::state::ProvisioningState;
use crate::timer::Scheduler;

/// A beacon seen while scanning
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DiscoveredPeripheral {
    /// Stable platform id. Also the handle for `connect`; the backend looks
    /// the live peripheral up by it, so no separate connection handle is kept.
    pub id: PeripheralId,
    pub name: String,
    /// Signal strength at first sighting, in dBm
    pub rssi: Option<i16>,
}

/// Accepts advertisements whose name matches exactly, one entry per id
#[derive(Debug)]
pub struct DiscoveryFilter {
    expected_name: String,
    peripherals: Vec<DiscoveredPeripheral>,
}

impl DiscoveryFilter {
    pub fn new(expected_name: &str) -> Self {
        Self {
            expected_name: expected_name.to_string(),
            peripherals: Vec::new(),
        }
    }

    /// Returns the new entry if the advertisement was accepted
    pub fn offer(
        &mut self,
        id: PeripheralId,
        name: &str,
        rssi: Option<i16>,
    ) -> Option<&DiscoveredPeripheral> {
        if name != self.expected_name || self.get(&id).is_some() {
            return None;
        }
        self.peripherals.push(DiscoveredPeripheral {
            id,
            name: name.to_string(),
            rssi,
        });
        self.peripherals.last()
    }

    pub fn get(&self, id: &str) -> Option<&DiscoveredPeripheral> {
        self.peripherals.iter().find(|p| p.id == id)
    }

    pub fn peripherals(&self) -> &[DiscoveredPeripheral] {
        &self.peripherals
    }

    pub fn clear(&mut self) {
        self.peripherals.clear();
    }
}

/// Whether the radio is scanning, or should be once it powers on
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScanControl {
    pub active: bool,
    pub pending: bool,
}

impl<C: Central, S: Scheduler> Provisioner<C, S> {
    /// Clear the discovered list and scan for beacons. If the radio is not
    /// powered on yet the scan starts as soon as it is.
    pub fn start_scanning(&mut self) {
        if self.state.is_connection_active() {
            self.log.log_detail("scan request ignored", format!("state is {}", self.state));
            return;
        }

        self.release_target();
        self.timers.disarm_all(&mut self.scheduler);
        self.reset_connection_session();
        self.discovery.clear();

        if self.radio == RadioState::PoweredOn {
            self.begin_scan();
        } else {
            self.scan.pending = true;
            self.log.log_detail("scan deferred", format!("radio is {}", self.radio));
        }
        self.set_state(ProvisioningState::Scanning);
    }

    /// Stop scanning. The discovered list is kept so a beacon can still be
    /// picked from it.
    pub fn stop_scanning(&mut self) {
        self.halt_scan();
        if self.state == ProvisioningState::Scanning {
            self.set_state(ProvisioningState::Idle);
        }
    }

    fn begin_scan(&mut self) {
        self.scan.pending = false;
        if !self.scan.active {
            self.central.start_scan();
            self.scan.active = true;
            self.log.log("scan started");
        }
    }

    pub(crate) fn halt_scan(&mut self) {
        if self.scan.active {
            self.central.stop_scan();
            self.scan.active = false;
            self.log.log("scan stopped");
        }
        if self.scan.pending {
            self.scan.pending = false;
            self.log.log("pending scan dropped");
        }
    }

    pub(crate) fn on_radio_state(&mut self, radio: RadioState) {
        let previous = std::mem::replace(&mut self.radio, radio);
        if previous == radio {
            return;
        }
        self.log.log_detail("radio state", format!("{previous} -> {radio}"));

        if radio == RadioState::PoweredOn {
            if self.scan.pending {
                self.begin_scan();
            }
            return;
        }

        // the stack stops scanning on its own when the radio goes away
        if self.scan.active {
            self.scan.active = false;
            if self.state == ProvisioningState::Scanning {
                self.scan.pending = true;
                self.log.log("scan suspended until the radio is back");
            }
        }
        if radio == RadioState::PoweredOff && self.state.is_connection_active() {
            self.fail(ProvisionError::RadioPoweredOff);
        }
    }

    pub(crate) fn on_scan_failed(&mut self, error: String) {
        self.scan.active = false;
        if self.state == ProvisioningState::Scanning {
            self.fail(ProvisionError::ScanFailed(error));
        } else {
            self.log.log_detail("late scan failure ignored", error);
        }
    }

    pub(crate) fn on_discovered(&mut self, id: PeripheralId, name: String, rssi: Option<i16>) {
        if self.state != ProvisioningState::Scanning {
            return;
        }
        if let Some(peripheral) = self.discovery.offer(id, &name, rssi) {
            let detail = match peripheral.rssi {
                Some(rssi) => format!("{} {} ({rssi} dBm)", peripheral.name, peripheral.id),
                None => format!("{} {}", peripheral.name, peripheral.id),
            };
            log::info!("found beacon: {detail}");
            self.log.log_detail("peripheral discovered", detail);
        }
    }
}
