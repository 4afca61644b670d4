//! BLE GATT Service Protocol Constants for Room Beacon Provisioning
//!
//! The beacon exposes one primary service with six characteristics. Four take
//! configuration writes, one takes the commit command and one reports status
//! over notifications.

use uuid::Uuid;

use crate::MinorId;

/// Provisioning service: 6e7a1000-b5a3-f393-e0a9-e50e24dcca9e
///
/// The beacon does not advertise this UUID, so discovery filters on the
/// advertised name instead.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6e7a1000_b5a3_f393_e0a9_e50e24dcca9e);

/// WiFi SSID characteristic (write, UTF-8)
pub const SSID_UUID: Uuid = Uuid::from_u128(0x6e7a1001_b5a3_f393_e0a9_e50e24dcca9e);

/// WiFi password characteristic (write, UTF-8)
pub const PASSWORD_UUID: Uuid = Uuid::from_u128(0x6e7a1002_b5a3_f393_e0a9_e50e24dcca9e);

/// Room name characteristic (write, UTF-8)
pub const ROOM_NAME_UUID: Uuid = Uuid::from_u128(0x6e7a1003_b5a3_f393_e0a9_e50e24dcca9e);

/// Minor id characteristic (write, 2 bytes big-endian)
pub const MINOR_ID_UUID: Uuid = Uuid::from_u128(0x6e7a1004_b5a3_f393_e0a9_e50e24dcca9e);

/// Command characteristic (write, UTF-8)
pub const COMMAND_UUID: Uuid = Uuid::from_u128(0x6e7a1005_b5a3_f393_e0a9_e50e24dcca9e);

/// Status characteristic (read/notify, UTF-8)
pub const STATUS_UUID: Uuid = Uuid::from_u128(0x6e7a1006_b5a3_f393_e0a9_e50e24dcca9e);

/// Name the beacon advertises while it is waiting to be provisioned
pub const DEVICE_NAME: &str = "RoomBeacon";

/// Command tokens written to the command characteristic
pub mod commands {
    /// Persist the written configuration and reboot into beacon mode
    pub const SAVE: &str = "SAVE";
}

/// Status tokens sent on the status characteristic
pub mod status {
    pub const READY: &str = "ready";
    pub const SAVED: &str = "saved";
    pub const ERROR_PREFIX: &str = "error:";
}

/// The six characteristics of the provisioning service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Ssid,
    Password,
    RoomName,
    MinorId,
    Command,
    Status,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Ssid,
        Role::Password,
        Role::RoomName,
        Role::MinorId,
        Role::Command,
        Role::Status,
    ];

    /// Roles that carry configuration, in the order they are written
    pub const CONFIGURATION: [Role; 4] =
        [Role::Ssid, Role::Password, Role::RoomName, Role::MinorId];

    pub const fn uuid(self) -> Uuid {
        match self {
            Role::Ssid => SSID_UUID,
            Role::Password => PASSWORD_UUID,
            Role::RoomName => ROOM_NAME_UUID,
            Role::MinorId => MINOR_ID_UUID,
            Role::Command => COMMAND_UUID,
            Role::Status => STATUS_UUID,
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Role> {
        Role::ALL.into_iter().find(|role| role.uuid() == uuid)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Ssid => "ssid",
            Role::Password => "password",
            Role::RoomName => "roomName",
            Role::MinorId => "minorId",
            Role::Command => "command",
            Role::Status => "status",
        }
    }

    /// Position in the enum-keyed lookup table
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode a text value (SSID, password, room name, command)
pub fn encode_text(value: &str) -> Vec<u8> {
    value.as_bytes().to_vec()
}

/// Encode the minor id as a big-endian u16
pub fn encode_minor_id(minor: MinorId) -> [u8; 2] {
    minor.get().to_be_bytes()
}

/// A value received on the status characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    /// Firmware initialised, configuration writes may begin
    Ready,
    /// Configuration persisted, the beacon is about to reboot
    Saved,
    /// The beacon rejected something; carries the whole payload, prefix included
    Error(String),
    /// Anything else
    Other(String),
}

impl StatusUpdate {
    /// Decode a status payload. Returns `None` when the payload is not UTF-8.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(payload).ok()?;
        Some(match text {
            status::READY => StatusUpdate::Ready,
            status::SAVED => StatusUpdate::Saved,
            t if t.starts_with(status::ERROR_PREFIX) => StatusUpdate::Error(t.to_string()),
            t => StatusUpdate::Other(t.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_map_to_distinct_uuids_under_the_service_base() {
        for role in Role::ALL {
            assert_eq!(Role::from_uuid(role.uuid()), Some(role));
            assert_eq!(role.uuid().as_fields().1, SERVICE_UUID.as_fields().1);
        }
        assert_eq!(Role::from_uuid(SERVICE_UUID), None);
        assert_eq!(
            SERVICE_UUID.to_string(),
            "6e7a1000-b5a3-f393-e0a9-e50e24dcca9e"
        );
    }

    #[test]
    fn minor_id_is_big_endian() {
        assert_eq!(encode_minor_id(MinorId::new(2).unwrap()), [0x00, 0x02]);
        assert_eq!(encode_minor_id(MinorId::new(0x1234).unwrap()), [0x12, 0x34]);
        assert_eq!(encode_minor_id(MinorId::new(65535).unwrap()), [0xff, 0xff]);
    }

    #[test]
    fn status_dispatch_is_exact() {
        assert_eq!(StatusUpdate::parse(b"ready"), Some(StatusUpdate::Ready));
        assert_eq!(StatusUpdate::parse(b"saved"), Some(StatusUpdate::Saved));
        assert_eq!(
            StatusUpdate::parse(b"error:auth_failed"),
            Some(StatusUpdate::Error("error:auth_failed".to_string()))
        );
        assert_eq!(
            StatusUpdate::parse(b"Ready"),
            Some(StatusUpdate::Other("Ready".to_string()))
        );
        assert_eq!(
            StatusUpdate::parse(b"saved\n"),
            Some(StatusUpdate::Other("saved\n".to_string()))
        );
        assert_eq!(StatusUpdate::parse(&[0xff, 0xfe]), None);
    }

    #[test]
    fn text_is_utf8() {
        assert_eq!(encode_text("Küche"), "Küche".as_bytes());
        assert_eq!(encode_text(commands::SAVE), b"SAVE");
    }
}
