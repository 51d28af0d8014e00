//! # Configuration
//!
//! `LodestoneConfig` is loaded from TOML. Every field has a default, so an
//! empty file (or a missing section) yields the default policy.
//!
//! ```toml
//! [engine]
//! max_call_depth = 256
//! max_loop_iterations = 1000
//!
//! [scheduler]
//! tick_ms = 50
//! overlap = "skip"
//!
//! [palette]
//! gold_block = "Action"
//! ```

use crate::block::BlockKind;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LodestoneConfig {
    pub engine: EngineConfig,
    pub scheduler: SchedulerConfig,
    /// Extra material mappings layered over [`Palette::default`].
    pub palette: HashMap<String, BlockKind>,
}

impl LodestoneConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigLoadError> {
        Ok(toml::from_str(input)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn palette(&self) -> Palette {
        let mut palette = Palette::default();
        for (material, kind) in &self.palette {
            palette.insert(material.clone(), *kind);
        }
        palette
    }
}

/// Guard rails of the execution engine.
///
/// The defaults are conservative policy choices, not measured limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum function call depth before `RecursionLimitExceeded`.
    pub max_call_depth: u32,
    /// Maximum iterations of one loop bracket before `LoopBoundExceeded`.
    pub max_loop_iterations: u32,
    /// Node-count budget of one invocation (callees included).
    pub max_nodes: u64,
    /// Wall-clock budget of one invocation, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 256,
            max_loop_iterations: 1_000,
            max_nodes: 100_000,
            timeout_ms: 5_000,
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// What an interval trigger does when the previous invocation of the same
/// activator is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Drop the new dispatch.
    #[default]
    Skip,
    /// Run the new invocation concurrently.
    Allow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_ms: u64,
    pub overlap: OverlapPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            overlap: OverlapPolicy::Skip,
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

/// Maps a physical marker material to the node kind it encodes.
#[derive(Debug, Clone)]
pub struct Palette {
    kinds: AHashMap<String, BlockKind>,
}

impl Palette {
    pub fn empty() -> Self {
        Self {
            kinds: AHashMap::new(),
        }
    }

    pub fn insert(&mut self, material: impl Into<String>, kind: BlockKind) {
        self.kinds.insert(material.into().to_ascii_lowercase(), kind);
    }

    pub fn with(mut self, material: impl Into<String>, kind: BlockKind) -> Self {
        self.insert(material, kind);
        self
    }

    /// `None` for materials that are not code markers.
    pub fn classify(&self, material: &str) -> Option<BlockKind> {
        self.kinds.get(&material.to_ascii_lowercase()).copied()
    }
}

impl Default for Palette {
    fn default() -> Self {
        Palette::empty()
            .with("diamond_block", BlockKind::Event)
            .with("lapis_block", BlockKind::FunctionDef)
            .with("cobblestone", BlockKind::Action)
            .with("oak_planks", BlockKind::Condition)
            .with("piston", BlockKind::ControlOpen)
            .with("sticky_piston", BlockKind::ControlClose)
            .with("end_stone", BlockKind::ControlElse)
            .with("lapis_ore", BlockKind::FunctionCall)
            .with("iron_block", BlockKind::VariableOp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config = LodestoneConfig::from_toml_str("").unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.engine.max_call_depth, 256);
        assert_eq!(config.scheduler.overlap, OverlapPolicy::Skip);
    }

    #[test]
    fn test_partial_override() {
        let config = LodestoneConfig::from_toml_str(
            r#"
            [engine]
            max_call_depth = 16

            [scheduler]
            overlap = "allow"

            [palette]
            gold_block = "Action"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.max_call_depth, 16);
        assert_eq!(config.engine.max_loop_iterations, 1_000);
        assert_eq!(config.scheduler.overlap, OverlapPolicy::Allow);

        let palette = config.palette();
        assert_eq!(palette.classify("GOLD_BLOCK"), Some(BlockKind::Action));
        assert_eq!(palette.classify("piston"), Some(BlockKind::ControlOpen));
        assert_eq!(palette.classify("dirt"), None);
    }

    #[test]
    fn test_invalid_config() {
        assert!(LodestoneConfig::from_toml_str("[engine]\nmax_call_depth = \"deep\"").is_err());
    }
}
