//! Provisioning state - the single value every component consults before acting

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "camelCase")]
pub enum ProvisioningState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    Ready,
    Writing,
    Saving,
    Saved,
    Error(String),
    Disconnected,
}

impl ProvisioningState {
    /// `saved`, `error` and `disconnected` end the attempt
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProvisioningState::Saved | ProvisioningState::Error(_) | ProvisioningState::Disconnected
        )
    }

    /// States in which a peripheral connection is requested or held
    pub fn is_connection_active(&self) -> bool {
        matches!(
            self,
            ProvisioningState::Connecting
                | ProvisioningState::DiscoveringServices
                | ProvisioningState::Ready
                | ProvisioningState::Writing
                | ProvisioningState::Saving
        )
    }
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisioningState::Idle => f.write_str("idle"),
            ProvisioningState::Scanning => f.write_str("scanning"),
            ProvisioningState::Connecting => f.write_str("connecting"),
            ProvisioningState::DiscoveringServices => f.write_str("discoveringServices"),
            ProvisioningState::Ready => f.write_str("ready"),
            ProvisioningState::Writing => f.write_str("writing"),
            ProvisioningState::Saving => f.write_str("saving"),
            ProvisioningState::Saved => f.write_str("saved"),
            ProvisioningState::Error(message) => write!(f, "error({message})"),
            ProvisioningState::Disconnected => f.write_str("disconnected"),
        }
    }
}
