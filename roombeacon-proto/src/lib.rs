//! Room beacon provisioning protocol - GATT contract, encodings and presets

use std::num::NonZeroU16;

pub mod ble;
pub mod presets;

pub use ble::{Role, StatusUpdate};
pub use presets::{ROOM_PRESETS, RoomPreset, find_preset};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtoError {
    #[error("minor id must be between 1 and 65535, got {0}")]
    InvalidMinorId(String),
}

/// Beacon minor id, used as the room identifier. Zero is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MinorId(NonZeroU16);

impl MinorId {
    pub fn new(value: u16) -> Result<Self, ProtoError> {
        NonZeroU16::new(value)
            .map(Self)
            .ok_or_else(|| ProtoError::InvalidMinorId(value.to_string()))
    }

    /// For compile-time tables; panics during const evaluation on zero
    pub const fn from_const(value: u16) -> Self {
        match NonZeroU16::new(value) {
            Some(v) => Self(v),
            None => panic!("minor id must be non-zero"),
        }
    }

    pub const fn get(self) -> u16 {
        self.0.get()
    }
}

impl std::fmt::Display for MinorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MinorId {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u16 = s
            .trim()
            .parse()
            .map_err(|_| ProtoError::InvalidMinorId(s.to_string()))?;
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_id_range() {
        assert!(MinorId::new(0).is_err());
        assert_eq!(MinorId::new(1).unwrap().get(), 1);
        assert_eq!("65535".parse::<MinorId>().unwrap().get(), 65535);
        assert_eq!(
            "65536".parse::<MinorId>(),
            Err(ProtoError::InvalidMinorId("65536".to_string()))
        );
        assert!("kitchen".parse::<MinorId>().is_err());
        assert!("0".parse::<MinorId>().is_err());
    }
}
