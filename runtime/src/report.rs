//! Invocation results and the observers that receive them.

use crate::error::{ExecutionError, FailureKind};
use chrono::{DateTime, Utc};
use lodestone_core::{BlockLocation, ScriptKey, WorldId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    /// The node that failed, when the failure is tied to one.
    pub location: Option<BlockLocation>,
}

impl Failure {
    pub fn new(error: &ExecutionError, location: Option<BlockLocation>) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            location,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Failed(Failure),
}

/// Result record of one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationReport {
    pub invocation_id: Uuid,
    pub script: ScriptKey,
    pub world: WorldId,
    pub trigger: Option<String>,
    pub actor: Option<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub nodes_executed: u64,
    pub outcome: Outcome,
}

impl InvocationReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Completed)
    }

    pub fn failure(&self) -> Option<&Failure> {
        match &self.outcome {
            Outcome::Completed => None,
            Outcome::Failed(f) => Some(f),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure().map(|f| f.kind)
    }
}

/// Receives every finished invocation (logging, GUI, metrics...).
pub trait InvocationObserver: Send + Sync + 'static {
    fn observe(&self, report: &InvocationReport);
}

/// Logs reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl InvocationObserver for TracingObserver {
    fn observe(&self, report: &InvocationReport) {
        match &report.outcome {
            Outcome::Completed => tracing::debug!(
                script = %report.script,
                nodes = report.nodes_executed,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Invocation completed"
            ),
            Outcome::Failed(failure) => tracing::warn!(
                script = %report.script,
                kind = %failure.kind,
                location = failure.location.as_ref().map(ToString::to_string),
                "Invocation failed: {}",
                failure.message
            ),
        }
    }
}

/// Keeps every report in memory.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    reports: Mutex<Vec<InvocationReport>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<InvocationReport> {
        self.reports.lock().clone()
    }

    pub fn take(&self) -> Vec<InvocationReport> {
        std::mem::take(&mut *self.reports.lock())
    }
}

impl InvocationObserver for CollectingObserver {
    fn observe(&self, report: &InvocationReport) {
        self.reports.lock().push(report.clone());
    }
}

/// Fans one report out to several observers.
#[derive(Default)]
pub struct ObserverSet {
    observers: Vec<std::sync::Arc<dyn InvocationObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: std::sync::Arc<dyn InvocationObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl InvocationObserver for ObserverSet {
    fn observe(&self, report: &InvocationReport) {
        for observer in &self.observers {
            observer.observe(report);
        }
    }
}
