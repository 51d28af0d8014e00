//! Lodestone Core - Block Graph Layer
//!
//! This crate defines the **structural** side of Lodestone:
//! - `Value`: the tagged data exchanged between nodes
//! - `BlockNode` / `Script`: the arena-backed program tree
//! - `GraphBuilder`: the spatial-arrangement-to-tree compiler
//!
//! **IMPORTANT**: This layer is runtime-agnostic - no async, no IO besides
//! loading the config file.

pub mod block;
pub mod builder;
pub mod config;
pub mod error;
pub mod schematic;
pub mod script;
pub mod value;
pub mod world;

pub use block::{BlockKind, BlockNode, Bracket, NodeId, Param, ParamSlot, Tier, VarOp, VarOpKind};
pub use builder::{ActionCatalog, AnyAction, BuildOutput, GraphBuilder};
pub use config::{EngineConfig, LodestoneConfig, OverlapPolicy, Palette, SchedulerConfig};
pub use error::ConfigurationError;
pub use schematic::Schematic;
pub use script::{Script, ScriptKey, ScriptSet};
pub use value::{ItemRef, KindMismatch, Location, Value, ValueKind};
pub use world::{BlockLocation, BlockPos, Marker, MarkerConfig, WorldId, WorldSnapshot};

pub mod prelude {
    pub use crate::block::{BlockKind, Param, ParamSlot, Tier};
    pub use crate::builder::{ActionCatalog, GraphBuilder};
    pub use crate::config::{EngineConfig, LodestoneConfig};
    pub use crate::script::{Script, ScriptKey, ScriptSet};
    pub use crate::value::Value;
    pub use crate::world::{BlockPos, WorldId, WorldSnapshot};
}
