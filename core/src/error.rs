use crate::block::BlockKind;
use crate::world::BlockLocation;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A malformed graph, detected at build time.
///
/// Any of these disables the script that owns `location`.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigurationError {
    #[error("bracket at {location} is never closed")]
    UnmatchedOpen { location: BlockLocation },

    #[error("closing bracket at {location} has no matching open bracket")]
    UnmatchedClose { location: BlockLocation },

    #[error("else at {location} is not inside a conditional bracket")]
    MisplacedElse { location: BlockLocation },

    #[error("'{action_id}' bracket at {location} must directly follow a condition")]
    UnguardedBracket {
        action_id: String,
        location: BlockLocation,
    },

    #[error("chain starting at {location} does not begin with an event or function marker")]
    MissingRoot { location: BlockLocation },

    #[error("{kind} marker at {location} can only start a chain")]
    MisplacedRoot {
        kind: BlockKind,
        location: BlockLocation,
    },

    #[error("{kind} marker at {location} has no configuration")]
    MissingConfiguration {
        kind: BlockKind,
        location: BlockLocation,
    },

    #[error("unknown {kind} '{action_id}' at {location}")]
    UnknownAction {
        kind: BlockKind,
        action_id: String,
        location: BlockLocation,
    },

    #[error("'{action_id}' at {location} is missing required parameter '{slot}'")]
    MissingParameter {
        action_id: String,
        slot: String,
        location: BlockLocation,
    },

    #[error("function '{name}' at {location} is already defined")]
    DuplicateFunction {
        name: String,
        location: BlockLocation,
    },
}

impl ConfigurationError {
    pub fn location(&self) -> &BlockLocation {
        match self {
            ConfigurationError::UnmatchedOpen { location }
            | ConfigurationError::UnmatchedClose { location }
            | ConfigurationError::MisplacedElse { location }
            | ConfigurationError::UnguardedBracket { location, .. }
            | ConfigurationError::MissingRoot { location }
            | ConfigurationError::MisplacedRoot { location, .. }
            | ConfigurationError::MissingConfiguration { location, .. }
            | ConfigurationError::UnknownAction { location, .. }
            | ConfigurationError::MissingParameter { location, .. }
            | ConfigurationError::DuplicateFunction { location, .. } => location,
        }
    }
}
