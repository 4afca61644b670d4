//! Adapter abstraction
//!
//! The state machine talks to the radio through [`Central`]. Every method is a
//! request that returns immediately; the outcome comes back later as an
//! [`Event`] on the session's input channel. The btleplug backend lives in
//! [`crate::btle`]; tests use a recording mock.

use uuid::Uuid;

use crate::timer::{Phase, TimerId};

/// Stable platform identifier of a peripheral
pub type PeripheralId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RadioState {
    #[default]
    Unknown,
    PoweredOff,
    PoweredOn,
}

impl std::fmt::Display for RadioState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RadioState::Unknown => f.write_str("unknown"),
            RadioState::PoweredOff => f.write_str("powered off"),
            RadioState::PoweredOn => f.write_str("powered on"),
        }
    }
}

/// Requests the state machine issues to the radio stack
pub trait Central {
    fn start_scan(&mut self);

    fn stop_scan(&mut self);

    fn connect(&mut self, id: &str);

    /// Abort a pending connect or tear down an established connection
    fn cancel_connection(&mut self, id: &str);

    /// Discover services, scoped to `service` where the platform allows it
    fn discover_services(&mut self, id: &str, service: Uuid);

    fn discover_characteristics(&mut self, id: &str, service: Uuid, characteristics: &[Uuid]);

    fn subscribe(&mut self, id: &str, characteristic: Uuid);

    fn read(&mut self, id: &str, characteristic: Uuid);

    /// Write with response; acknowledged by [`Event::WriteCompleted`]
    fn write(&mut self, id: &str, characteristic: Uuid, value: Vec<u8>);
}

/// Everything that can happen to the state machine besides caller commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    RadioStateChanged(RadioState),
    ScanFailed(String),
    Discovered {
        id: PeripheralId,
        name: String,
        rssi: Option<i16>,
    },
    Connected {
        id: PeripheralId,
    },
    ConnectFailed {
        id: PeripheralId,
        error: String,
    },
    Disconnected {
        id: PeripheralId,
        reason: Option<String>,
    },
    ServicesDiscovered {
        id: PeripheralId,
        result: Result<Vec<Uuid>, String>,
    },
    CharacteristicsDiscovered {
        id: PeripheralId,
        service: Uuid,
        result: Result<Vec<Uuid>, String>,
    },
    WriteCompleted {
        id: PeripheralId,
        characteristic: Uuid,
        result: Result<(), String>,
    },
    SubscribeFailed {
        id: PeripheralId,
        characteristic: Uuid,
        error: String,
    },
    /// A notification or the result of an explicit read
    ValueUpdated {
        id: PeripheralId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    TimerFired {
        phase: Phase,
        timer: TimerId,
    },
}
