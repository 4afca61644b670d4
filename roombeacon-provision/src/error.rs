use roombeacon_proto::Role;
use uuid::Uuid;

/// Why a provisioning attempt ended in the `error` state.
///
/// The state carries the `Display` text of one of these, so the wording is
/// what the user sees.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisionError {
    #[error("connection timed out after {0}s; power-cycle the beacon and try again")]
    ConnectionTimeout(u64),
    #[error("could not connect to the beacon: {0}")]
    ConnectFailed(String),
    #[error("service discovery timed out after {0}s; power-cycle the beacon and try again")]
    ServiceDiscoveryTimeout(u64),
    #[error("service discovery failed: {0}")]
    ServiceDiscoveryFailed(String),
    #[error("characteristic discovery timed out after {0}s; power-cycle the beacon and try again")]
    CharacteristicDiscoveryTimeout(u64),
    #[error("characteristic discovery failed: {0}")]
    CharacteristicDiscoveryFailed(String),
    #[error("provisioning service {expected} not found; beacon exposed [{}]", join_uuids(.found))]
    ServiceNotFound { expected: Uuid, found: Vec<Uuid> },
    #[error("beacon does not expose the {0} characteristic")]
    MissingCharacteristic(Role),
    #[error("beacon exposes none of the configuration characteristics")]
    NothingToWrite,
    #[error("writing {role} failed: {message}")]
    WriteFailure { role: Role, message: String },
    #[error(
        "beacon did not confirm the save within {0}s; it may not have received the configuration"
    )]
    SaveTimeout(u64),
    /// Carries the beacon's own status payload verbatim
    #[error("{0}")]
    PeripheralReported(String),
    #[error("beacon disconnected unexpectedly{}", reason_suffix(.0))]
    UnexpectedDisconnect(Option<String>),
    #[error("no beacon is connected")]
    NotConnected,
    #[error("unknown peripheral {0}; scan again")]
    UnknownPeripheral(String),
    #[error("scan failed: {0}")]
    ScanFailed(String),
    #[error("bluetooth was turned off")]
    RadioPoweredOff,
}

fn join_uuids(uuids: &[Uuid]) -> String {
    uuids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(", ")
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(": {reason}"),
        None => String::new(),
    }
}

/// Failure reading or writing the on-disk configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),
}
