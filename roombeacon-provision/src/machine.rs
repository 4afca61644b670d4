//! The provisioning state machine
//!
//! [`Provisioner`] owns every piece of session state and is driven from one
//! place only: the caller API (`start_scanning`, `connect`, `provision`,
//! `cancel`) and [`Provisioner::handle`] for radio events and timer firings.
//! Nothing in here blocks or awaits; requests go out through [`Central`] and
//! [`Scheduler`] and their outcomes come back as events. Handlers for the
//! individual components live in `discovery`, `connection`, `resolver`,
//! `writer` and `save`.

use crate::central::{Central, Event, RadioState};
use crate::config::ProvisionerConfig;
use crate::diagnostics::DiagnosticLog;
use crate::discovery::{DiscoveredPeripheral, DiscoveryFilter, ScanControl};
use crate::error::ProvisionError;
use crate::resolver::{CharacteristicMap, GattStage};
use crate::save::ProvisionedDevice;
use crate::state::ProvisioningState;
use crate::timer::{Phase, Scheduler, TimerId, Timers};
use crate::writer::{ProvisionRequest, WriteProgress};

pub struct Provisioner<C, S> {
    pub(crate) central: C,
    pub(crate) scheduler: S,
    pub(crate) config: ProvisionerConfig,
    pub(crate) state: ProvisioningState,
    pub(crate) log: DiagnosticLog,
    pub(crate) timers: Timers,
    pub(crate) radio: RadioState,
    pub(crate) scan: ScanControl,
    pub(crate) discovery: DiscoveryFilter,
    /// Peripheral being connected to or configured
    pub(crate) target: Option<DiscoveredPeripheral>,
    pub(crate) gatt: GattStage,
    pub(crate) characteristics: CharacteristicMap,
    pub(crate) status_subscribed: bool,
    pub(crate) progress: WriteProgress,
    pub(crate) request: Option<ProvisionRequest>,
    pub(crate) save_issued: bool,
    pub(crate) provisioned: Vec<ProvisionedDevice>,
}

impl<C: Central, S: Scheduler> Provisioner<C, S> {
    pub fn new(config: ProvisionerConfig, central: C, scheduler: S) -> Self {
        let mut log = DiagnosticLog::new();
        log.log_detail(
            "session created",
            format!("expecting beacons named {:?}", config.device_name),
        );

        Self {
            central,
            scheduler,
            discovery: DiscoveryFilter::new(&config.device_name),
            config,
            state: ProvisioningState::Idle,
            log,
            timers: Timers::default(),
            radio: RadioState::Unknown,
            scan: ScanControl::default(),
            target: None,
            gatt: GattStage::default(),
            characteristics: CharacteristicMap::default(),
            status_subscribed: false,
            progress: WriteProgress::default(),
            request: None,
            save_issued: false,
            provisioned: Vec::new(),
        }
    }

    pub fn state(&self) -> &ProvisioningState {
        &self.state
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.log
    }

    pub fn export_diagnostic_log(&self) -> String {
        self.log.export()
    }

    pub fn peripherals(&self) -> &[DiscoveredPeripheral] {
        self.discovery.peripherals()
    }

    pub fn provisioned(&self) -> &[ProvisionedDevice] {
        &self.provisioned
    }

    pub fn progress(&self) -> WriteProgress {
        self.progress
    }

    pub fn characteristics(&self) -> &CharacteristicMap {
        &self.characteristics
    }

    pub fn is_scan_pending(&self) -> bool {
        self.scan.pending
    }

    /// Dispatch one radio event or timer firing
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::RadioStateChanged(radio) => self.on_radio_state(radio),
            Event::ScanFailed(error) => self.on_scan_failed(error),
            Event::Discovered { id, name, rssi } => self.on_discovered(id, name, rssi),
            Event::Connected { id } => self.on_connected(&id),
            Event::ConnectFailed { id, error } => self.on_connect_failed(&id, error),
            Event::Disconnected { id, reason } => self.on_disconnected(&id, reason),
            Event::ServicesDiscovered { id, result } => self.on_services(&id, result),
            Event::CharacteristicsDiscovered {
                id,
                service,
                result,
            } => self.on_characteristics(&id, service, result),
            Event::WriteCompleted {
                id,
                characteristic,
                result,
            } => self.on_write_completed(&id, characteristic, result),
            Event::SubscribeFailed {
                id,
                characteristic,
                error,
            } => self.on_subscribe_failed(&id, characteristic, error),
            Event::ValueUpdated {
                id,
                characteristic,
                value,
            } => self.on_value(&id, characteristic, &value),
            Event::TimerFired { phase, timer } => self.on_timer(phase, timer),
        }
    }

    /// Stop scanning, drop the connection, invalidate every timer and go back
    /// to `idle`, whatever the current state.
    pub fn cancel(&mut self) {
        self.log.log_detail("cancel requested", format!("state was {}", self.state));
        self.halt_scan();
        self.release_target();
        self.timers.disarm_all(&mut self.scheduler);
        self.discovery.clear();
        self.reset_connection_session();
        self.set_state(ProvisioningState::Idle);
    }

    fn on_timer(&mut self, phase: Phase, timer: TimerId) {
        if !self.timers.fire(phase, timer) {
            self.log.log_detail("stale timer ignored", phase.to_string());
            return;
        }
        match phase {
            Phase::Connect => self.on_connect_timeout(),
            Phase::ServiceDiscovery => self.on_service_discovery_timeout(),
            Phase::CharacteristicDiscovery => self.on_characteristic_discovery_timeout(),
            Phase::Save => self.on_save_timeout(),
        }
    }

    pub(crate) fn set_state(&mut self, next: ProvisioningState) {
        if self.state == next {
            return;
        }
        log::info!("provisioning state: {} -> {}", self.state, next);
        self.log.log_detail("state", format!("{} -> {}", self.state, next));
        self.state = next;
    }

    /// Enter the terminal `error` state. Outstanding timers are invalidated;
    /// the connection, if any, is left for `cancel` to tear down.
    pub(crate) fn fail(&mut self, error: ProvisionError) {
        let message = error.to_string();
        if self.state.is_terminal() {
            // the attempt already has its outcome
            self.log.log_detail("error after the attempt ended", message.as_str());
            return;
        }
        log::warn!("provisioning failed: {message}");
        self.log.log_detail("error", message.as_str());
        self.timers.disarm_all(&mut self.scheduler);
        self.set_state(ProvisioningState::Error(message));
    }

    pub(crate) fn is_target(&self, id: &str) -> bool {
        self.target.as_ref().is_some_and(|p| p.id == id)
    }

    pub(crate) fn target_id(&self) -> Option<String> {
        self.target.as_ref().map(|p| p.id.clone())
    }

    /// Drop the current target, asking the radio to disconnect from it
    pub(crate) fn release_target(&mut self) {
        if let Some(target) = self.target.take() {
            self.log.log_detail("connection released", target.id.as_str());
            self.central.cancel_connection(&target.id);
        }
    }

    /// Forget everything learned about the previous connection
    pub(crate) fn reset_connection_session(&mut self) {
        self.gatt = GattStage::default();
        self.characteristics = CharacteristicMap::default();
        self.status_subscribed = false;
        self.progress.reset();
        self.request = None;
        self.save_issued = false;
    }
}
