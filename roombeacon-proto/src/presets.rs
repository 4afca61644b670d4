//! Room presets used to pre-fill the room name and minor id

use crate::MinorId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomPreset {
    pub name: &'static str,
    pub minor_id: MinorId,
}

pub const ROOM_PRESETS: [RoomPreset; 6] = [
    RoomPreset {
        name: "Living Room",
        minor_id: MinorId::from_const(1),
    },
    RoomPreset {
        name: "Kitchen",
        minor_id: MinorId::from_const(2),
    },
    RoomPreset {
        name: "Bedroom",
        minor_id: MinorId::from_const(3),
    },
    RoomPreset {
        name: "Office",
        minor_id: MinorId::from_const(4),
    },
    RoomPreset {
        name: "Bathroom",
        minor_id: MinorId::from_const(5),
    },
    RoomPreset {
        name: "Hallway",
        minor_id: MinorId::from_const(6),
    },
];

/// Look up a preset by name, ignoring case and surrounding whitespace
pub fn find_preset(name: &str) -> Option<&'static RoomPreset> {
    let name = name.trim();
    ROOM_PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_have_unique_minor_ids() {
        let mut ids: Vec<u16> = ROOM_PRESETS.iter().map(|p| p.minor_id.get()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), ROOM_PRESETS.len());
    }

    #[test]
    fn find_preset_ignores_case() {
        let kitchen = find_preset(" kitchen ").unwrap();
        assert_eq!(kitchen.name, "Kitchen");
        assert_eq!(kitchen.minor_id.get(), 2);
        assert!(find_preset("Attic").is_none());
    }
}
