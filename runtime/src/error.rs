//! Runtime error types.
//!
//! Everything that can stop an invocation is an [`ExecutionError`]. Errors
//! never escape an invocation: the engine turns them into a
//! [`Failure`](crate::report::Failure) record.

use lodestone_core::{KindMismatch, Tier};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error reported by an external action or condition handler.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("missing parameter '{0}'")]
    MissingParam(String),

    #[error("parameter '{slot}': {source}")]
    Kind {
        slot: String,
        #[source]
        source: KindMismatch,
    },

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("failed to load {tier} variables for '{scope}': {message}")]
    Load {
        tier: Tier,
        scope: String,
        message: String,
    },

    #[error("failed to save {tier} variables for '{scope}': {message}")]
    Save {
        tier: Tier,
        scope: String,
        message: String,
    },

    #[error("{0} variables are not kept in the shared store")]
    NotShared(Tier),
}

#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("type mismatch in {context}: {source}")]
    TypeMismatch {
        context: String,
        #[source]
        source: KindMismatch,
    },

    #[error("division by zero in {0}")]
    DivisionByZero(String),

    #[error("recursion limit of {limit} exceeded calling '{function}'")]
    RecursionLimitExceeded { limit: u32, function: String },

    #[error("loop exceeded {limit} iterations")]
    LoopBoundExceeded { limit: u32 },

    #[error("execution exceeded its {budget_ms}ms budget")]
    Timeout { budget_ms: u64 },

    #[error("execution exceeded its budget of {limit} nodes")]
    NodeBudgetExceeded { limit: u64 },

    #[error("invocation cancelled")]
    Cancelled,

    #[error("handler '{action_id}' failed: {message}")]
    HandlerFailure { action_id: String, message: String },

    #[error("no handler registered for '{0}'")]
    UnknownHandler(String),

    #[error("no enabled function named '{0}'")]
    UnknownFunction(String),

    #[error("{0} variables need a triggering player")]
    MissingActor(Tier),

    #[error("malformed script: {0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ExecutionError {
    /// Translate a handler error raised by `action_id`.
    ///
    /// Kind mismatches on parameters are type errors of the script, not of
    /// the handler.
    pub fn from_handler(action_id: &str, error: HandlerError) -> Self {
        match error {
            HandlerError::Kind { slot, source } => ExecutionError::TypeMismatch {
                context: format!("{}.{}", action_id, slot),
                source,
            },
            other => ExecutionError::HandlerFailure {
                action_id: action_id.to_string(),
                message: other.to_string(),
            },
        }
    }

    pub fn type_mismatch(context: impl Into<String>, source: KindMismatch) -> Self {
        ExecutionError::TypeMismatch {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ExecutionError::TypeMismatch { .. } => FailureKind::TypeMismatch,
            ExecutionError::RecursionLimitExceeded { .. } => FailureKind::RecursionLimitExceeded,
            ExecutionError::LoopBoundExceeded { .. } => FailureKind::LoopBoundExceeded,
            ExecutionError::Timeout { .. } | ExecutionError::NodeBudgetExceeded { .. } => {
                FailureKind::ExecutionTimeout
            }
            ExecutionError::HandlerFailure { .. } | ExecutionError::UnknownHandler(_) => {
                FailureKind::HandlerFailure
            }
            ExecutionError::Cancelled => FailureKind::Cancelled,
            ExecutionError::DivisionByZero(_)
            | ExecutionError::UnknownFunction(_)
            | ExecutionError::MissingActor(_)
            | ExecutionError::Malformed(_)
            | ExecutionError::Store(_) => FailureKind::Runtime,
        }
    }
}

/// Coarse failure classification exposed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    TypeMismatch,
    RecursionLimitExceeded,
    LoopBoundExceeded,
    ExecutionTimeout,
    HandlerFailure,
    Cancelled,
    Runtime,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestone_core::ValueKind;

    #[test]
    fn test_handler_kind_errors_are_type_mismatches() {
        let err = ExecutionError::from_handler(
            "sendMessage",
            HandlerError::Kind {
                slot: "text".into(),
                source: KindMismatch {
                    expected: ValueKind::Text,
                    found: ValueKind::Number,
                },
            },
        );
        assert_eq!(err.kind(), FailureKind::TypeMismatch);
        assert_eq!(
            err.to_string(),
            "type mismatch in sendMessage.text: expected text, found number"
        );

        let err = ExecutionError::from_handler("fail", HandlerError::failed("boom"));
        assert_eq!(err.kind(), FailureKind::HandlerFailure);
        assert_eq!(err.to_string(), "handler 'fail' failed: boom");
    }

    #[test]
    fn test_budget_errors_are_timeouts() {
        assert_eq!(
            ExecutionError::NodeBudgetExceeded { limit: 10 }.kind(),
            FailureKind::ExecutionTimeout
        );
        assert_eq!(
            ExecutionError::Timeout { budget_ms: 5 }.kind(),
            FailureKind::ExecutionTimeout
        );
    }
}
