use serde::{Deserialize, Serialize};

/// Block-precision position used for movement detection.
///
/// Sub-block jitter and head rotation are deliberately not part of the
/// comparison; only a change of world or block counts as movement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub world: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Location {
    pub fn new(world: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }
}

/// What the tracker sees of a connection on a given tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    Offline,
    Online(Location),
}
