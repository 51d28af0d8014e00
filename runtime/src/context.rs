//! Per-invocation execution state.
//!
//! An [`ExecutionContext`] is created fresh for each dispatched invocation and
//! dropped when it completes. Function calls get a child context: same actor,
//! payload, resources and budget, but a fresh Local frame.

use crate::bus::Bus;
use crate::error::ExecutionError;
use ahash::AHashMap;
use lodestone_core::{Tier, Value, WorldId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The player (or other entity) that triggered an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    /// Stable id; the scope key of PlayerPersistent variables.
    pub id: String,
    pub name: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The event payload bag handed over by the trigger source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Text entry, if present and textual.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_text().ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// Wall-clock and node budget shared by an invocation and its callees.
#[derive(Debug)]
pub(crate) struct Budget {
    started: Instant,
    timeout: Duration,
    nodes: AtomicU64,
}

impl Budget {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            started: Instant::now(),
            timeout,
            nodes: AtomicU64::new(0),
        }
    }

    /// Count one node and return the running total.
    pub(crate) fn tick(&self) -> u64 {
        self.nodes.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn nodes(&self) -> u64 {
        self.nodes.load(Ordering::Relaxed)
    }

    pub(crate) fn expired(&self) -> bool {
        self.started.elapsed() > self.timeout
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Debug)]
pub struct ExecutionContext {
    pub invocation_id: Uuid,
    pub world: WorldId,
    pub actor: Option<Actor>,
    /// Trigger key that started this invocation, if any.
    pub trigger: Option<String>,
    pub payload: Arc<Payload>,
    /// Host resources for handlers.
    pub bus: Bus,
    locals: AHashMap<String, Value>,
    depth: u32,
    cancel: CancellationToken,
    budget: Option<Arc<Budget>>,
}

impl ExecutionContext {
    pub fn new(world: impl Into<WorldId>) -> Self {
        Self {
            invocation_id: Uuid::new_v4(),
            world: world.into(),
            actor: None,
            trigger: None,
            payload: Arc::new(Payload::new()),
            bus: Bus::new(),
            locals: AHashMap::new(),
            depth: 0,
            cancel: CancellationToken::new(),
            budget: None,
        }
    }

    pub fn with_actor(mut self, actor: Option<Actor>) -> Self {
        self.actor = actor;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Arc<Payload>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }

    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = bus;
        self
    }

    /// Share an external cancellation token (e.g. host shutdown).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Number of function frames above the invocation root.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn local(&self, name: &str) -> Value {
        self.locals.get(name).cloned().unwrap_or_default()
    }

    pub fn set_local(&mut self, name: impl Into<String>, value: Value) {
        self.locals.insert(name.into(), value);
    }

    pub fn locals(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.locals.iter()
    }

    /// Payload entry, `Unresolved` if the event did not carry it.
    pub fn event(&self, key: &str) -> Value {
        self.payload.get(key).cloned().unwrap_or_default()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Scope key of a tier for this invocation.
    pub fn scope_key(&self, tier: Tier) -> Result<String, ExecutionError> {
        match tier {
            Tier::Local => Ok(self.invocation_id.to_string()),
            Tier::PlayerPersistent => self
                .actor
                .as_ref()
                .map(|a| a.id.clone())
                .ok_or(ExecutionError::MissingActor(tier)),
            Tier::WorldGlobal => Ok(self.world.to_string()),
            Tier::ServerGlobal => Ok(String::new()),
        }
    }

    /// Context for a function call: one level deeper, fresh Local frame
    /// seeded with `args`.
    pub(crate) fn child(&self, args: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            invocation_id: self.invocation_id,
            world: self.world.clone(),
            actor: self.actor.clone(),
            trigger: self.trigger.clone(),
            payload: Arc::clone(&self.payload),
            bus: self.bus.clone(),
            locals: args.into_iter().collect(),
            depth: self.depth + 1,
            cancel: self.cancel.clone(),
            budget: self.budget.clone(),
        }
    }

    pub(crate) fn arm(&mut self, timeout: Duration) -> Arc<Budget> {
        Arc::clone(
            self.budget
                .get_or_insert_with(|| Arc::new(Budget::new(timeout))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_keys() {
        let ctx = ExecutionContext::new("overworld").with_actor(Some(Actor::new("u-1", "Steve")));
        assert_eq!(ctx.scope_key(Tier::PlayerPersistent).unwrap(), "u-1");
        assert_eq!(ctx.scope_key(Tier::WorldGlobal).unwrap(), "overworld");
        assert_eq!(ctx.scope_key(Tier::ServerGlobal).unwrap(), "");

        let anonymous = ExecutionContext::new("overworld");
        assert!(matches!(
            anonymous.scope_key(Tier::PlayerPersistent),
            Err(ExecutionError::MissingActor(Tier::PlayerPersistent))
        ));
    }

    #[test]
    fn test_child_has_fresh_locals() {
        let mut ctx = ExecutionContext::new("w").with_payload(Payload::new().with("message", "hi"));
        ctx.set_local("x", Value::from(1i64));

        let child = ctx.child([("arg".to_string(), Value::from("a"))]);
        assert_eq!(child.depth(), 1);
        assert_eq!(child.local("x"), Value::Unresolved);
        assert_eq!(child.local("arg"), Value::from("a"));
        assert_eq!(child.event("message"), Value::from("hi"));
        assert_eq!(child.invocation_id, ctx.invocation_id);
    }
}
