//! World snapshot types consumed by the graph builder.
//!
//! The snapshot is what the placement layer hands over after a structural
//! edit: every placed marker (material + position) and every configuration
//! attached to a position.

use crate::block::ParamSlot;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldId(pub String);

impl WorldId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for WorldId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for WorldId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

/// World id + block coordinates. Used in failure records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockLocation {
    pub world: WorldId,
    pub pos: BlockPos,
}

impl fmt::Display for BlockLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.world, self.pos)
    }
}

/// A physical marker placed in the world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub pos: BlockPos,
    pub material: String,
}

/// Configuration attached to a marker position by the editor flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerConfig {
    pub pos: BlockPos,
    pub action_id: String,
    #[serde(default)]
    pub params: Vec<ParamSlot>,
    /// Disabled nodes are skipped by the engine.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub world: WorldId,
    #[serde(default)]
    pub markers: Vec<Marker>,
    #[serde(default)]
    pub configs: Vec<MarkerConfig>,
}

impl WorldSnapshot {
    pub fn new(world: impl Into<WorldId>) -> Self {
        Self {
            world: world.into(),
            markers: Vec::new(),
            configs: Vec::new(),
        }
    }

    /// Place a marker.
    pub fn place(mut self, pos: BlockPos, material: impl Into<String>) -> Self {
        self.markers.push(Marker {
            pos,
            material: material.into(),
        });
        self
    }

    /// Attach a configuration to a position.
    pub fn configure(
        mut self,
        pos: BlockPos,
        action_id: impl Into<String>,
        params: Vec<ParamSlot>,
    ) -> Self {
        self.configs.push(MarkerConfig {
            pos,
            action_id: action_id.into(),
            params,
            enabled: true,
        });
        self
    }
}
