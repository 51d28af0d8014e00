//! # Activator Registry
//!
//! Binds trigger keys to enabled event scripts and dispatches runtime events
//! to the [`Engine`].
//!
//! The index of a world is replaced wholesale on every rebuild. Invocations
//! already running keep the script set they started with.

use crate::bus::Bus;
use crate::context::{Actor, ExecutionContext, Payload};
use crate::engine::Engine;
use crate::report::InvocationReport;
use ahash::AHashMap;
use lodestone_core::{BlockKind, BlockNode, OverlapPolicy, Param, Script, ScriptSet, Value, WorldId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Prefix of interval trigger keys, e.g. `tick-interval:20`.
pub const INTERVAL_PREFIX: &str = "tick-interval:";

/// Parse the interval of a `tick-interval:N` trigger key.
pub fn interval_of(trigger: &str) -> Option<u64> {
    trigger
        .strip_prefix(INTERVAL_PREFIX)
        .and_then(|n| n.parse().ok())
        .filter(|n| *n > 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivatorId(pub u64);

impl fmt::Display for ActivatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "activator-{}", self.0)
    }
}

/// Payload predicate attached to an activator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TriggerFilter {
    /// Payload `material` equals this (case-insensitive).
    Material(String),
    /// Payload `message` contains this (case-insensitive).
    Keyword(String),
    /// Payload `tick` is a multiple of this.
    Interval(u64),
}

impl TriggerFilter {
    /// Filters declared by an event node: literal `material`/`keyword`
    /// parameters and the interval of a `tick-interval:N` key.
    pub fn for_event(node: &BlockNode) -> Vec<TriggerFilter> {
        let literal = |slot: &str| match node.param(slot) {
            Some(Param::Literal {
                value: Value::Text(s),
            }) => Some(s.clone()),
            _ => None,
        };

        let mut filters = Vec::new();
        if let Some(material) = literal("material") {
            filters.push(TriggerFilter::Material(material));
        }
        if let Some(keyword) = literal("keyword") {
            filters.push(TriggerFilter::Keyword(keyword));
        }
        if let Some(n) = interval_of(&node.action_id) {
            filters.push(TriggerFilter::Interval(n));
        }
        filters
    }

    pub fn accepts(&self, payload: &Payload) -> bool {
        match self {
            TriggerFilter::Material(material) => payload
                .text("material")
                .is_some_and(|m| m.eq_ignore_ascii_case(material)),
            TriggerFilter::Keyword(keyword) => payload
                .text("message")
                .is_some_and(|m| m.to_lowercase().contains(&keyword.to_lowercase())),
            TriggerFilter::Interval(n) => match payload.get("tick") {
                Some(Value::Number(tick)) if tick.fract() == 0.0 && *tick >= 0.0 => {
                    (*tick as u64) % n == 0
                }
                _ => false,
            },
        }
    }
}

/// One trigger key + filters bound to one script.
#[derive(Debug)]
pub struct Activator {
    pub id: ActivatorId,
    pub trigger: String,
    pub filters: Vec<TriggerFilter>,
    pub script: Arc<Script>,
    enabled: AtomicBool,
    in_flight: Arc<AtomicUsize>,
}

impl Activator {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Invocations submitted by this activator that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn accepts(&self, payload: &Payload) -> bool {
        self.filters.iter().all(|f| f.accepts(payload))
    }
}

/// Decrements the in-flight counter when an invocation task ends.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }

    /// Enter only if nothing else is in flight. Check and increment are one
    /// atomic step, so two concurrent dispatches cannot both get in.
    fn enter_exclusive(counter: &Arc<AtomicUsize>) -> Option<Self> {
        counter
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(counter)))
    }

    fn admit(counter: &Arc<AtomicUsize>, overlap: OverlapPolicy) -> Option<Self> {
        match overlap {
            OverlapPolicy::Allow => Some(Self::enter(counter)),
            OverlapPolicy::Skip => Self::enter_exclusive(counter),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The activators of one world, indexed by trigger key.
#[derive(Debug, Default)]
pub struct WorldIndex {
    pub scripts: Arc<ScriptSet>,
    by_trigger: AHashMap<String, Vec<Arc<Activator>>>,
    all: Vec<Arc<Activator>>,
}

impl WorldIndex {
    /// Activators of `trigger` in registration order.
    pub fn activators(&self, trigger: &str) -> &[Arc<Activator>] {
        self.by_trigger
            .get(trigger)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Activator>> {
        self.all.iter()
    }

    pub fn triggers(&self) -> impl Iterator<Item = &str> {
        self.by_trigger.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

pub struct ActivatorRegistry {
    engine: Arc<Engine>,
    bus: Bus,
    shutdown: CancellationToken,
    worlds: RwLock<AHashMap<WorldId, Arc<WorldIndex>>>,
    next_id: AtomicU64,
}

impl ActivatorRegistry {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            bus: Bus::new(),
            shutdown: CancellationToken::new(),
            worlds: RwLock::new(AHashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Resources handed to every invocation.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = bus;
        self
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Replace the index of `world` with activators for `scripts`.
    ///
    /// Function definitions and disabled scripts get no activator.
    pub fn index(&self, world: &WorldId, scripts: ScriptSet) -> Arc<WorldIndex> {
        let mut index = WorldIndex::default();
        for script in scripts.iter() {
            let root = script.root();
            if root.kind != BlockKind::Event || !script.enabled {
                continue;
            }
            let activator = Arc::new(Activator {
                id: ActivatorId(self.next_id.fetch_add(1, Ordering::Relaxed)),
                trigger: root.action_id.clone(),
                filters: TriggerFilter::for_event(root),
                script: Arc::clone(script),
                enabled: AtomicBool::new(root.enabled),
                in_flight: Arc::new(AtomicUsize::new(0)),
            });
            index
                .by_trigger
                .entry(activator.trigger.clone())
                .or_default()
                .push(Arc::clone(&activator));
            index.all.push(activator);
        }
        index.scripts = Arc::new(scripts);

        let index = Arc::new(index);
        tracing::info!(
            lodestone.world = %world,
            activators = index.len(),
            triggers = index.by_trigger.len(),
            "Indexed activators"
        );
        self.worlds.write().insert(world.clone(), Arc::clone(&index));
        index
    }

    /// Drop the index of a world (e.g. on unload). Running invocations finish.
    pub fn remove(&self, world: &WorldId) -> Option<Arc<WorldIndex>> {
        self.worlds.write().remove(world)
    }

    pub fn world(&self, world: &WorldId) -> Option<Arc<WorldIndex>> {
        self.worlds.read().get(world).cloned()
    }

    pub fn worlds(&self) -> Vec<WorldId> {
        self.worlds.read().keys().cloned().collect()
    }

    fn find(&self, id: ActivatorId) -> Option<Arc<Activator>> {
        self.worlds
            .read()
            .values()
            .find_map(|index| index.all.iter().find(|a| a.id == id).cloned())
    }

    /// Enable or disable an activator. Returns `false` if the id is unknown.
    ///
    /// Disabling only stops new dispatches.
    pub fn set_enabled(&self, id: ActivatorId, enabled: bool) -> bool {
        match self.find(id) {
            Some(activator) => {
                activator.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    /// Cancel every running invocation at its next node.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Submit every matching activator of `trigger` in `world`.
    ///
    /// Returns one handle per submitted invocation, in registration order.
    pub fn dispatch(
        &self,
        world: &WorldId,
        trigger: &str,
        actor: Option<Actor>,
        payload: Payload,
    ) -> Vec<JoinHandle<InvocationReport>> {
        self.dispatch_with(world, trigger, actor, payload, OverlapPolicy::Allow)
    }

    /// [`dispatch`](Self::dispatch) with an explicit overlap policy. With
    /// `Skip`, an activator that still has an invocation in flight is passed over.
    pub fn dispatch_with(
        &self,
        world: &WorldId,
        trigger: &str,
        actor: Option<Actor>,
        payload: Payload,
        overlap: OverlapPolicy,
    ) -> Vec<JoinHandle<InvocationReport>> {
        let Some(index) = self.world(world) else {
            return Vec::new();
        };
        let activators = index.activators(trigger);
        if activators.is_empty() {
            return Vec::new();
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!(%world, trigger, error = %e, "Dispatch outside of a tokio runtime");
                return Vec::new();
            }
        };

        let payload = Arc::new(payload);
        let mut handles = Vec::new();
        for activator in activators {
            if !activator.is_enabled() || !activator.script.enabled || !activator.accepts(&payload) {
                continue;
            }
            let Some(guard) = InFlight::admit(&activator.in_flight, overlap) else {
                tracing::debug!(activator = %activator.id, trigger, "Previous invocation still running, skipping");
                continue;
            };
            let ctx = ExecutionContext::new(world.clone())
                .with_actor(actor.clone())
                .with_payload(Arc::clone(&payload))
                .with_trigger(trigger)
                .with_bus(self.bus.clone())
                .with_cancellation(self.shutdown.child_token());
            let engine = Arc::clone(&self.engine);
            let scripts = Arc::clone(&index.scripts);
            let script = Arc::clone(&activator.script);

            handles.push(runtime.spawn(async move {
                let _guard = guard;
                engine.invoke(scripts, script, ctx).await
            }));
        }
        tracing::trace!(%world, trigger, submitted = handles.len(), "Dispatched");
        handles
    }
}

impl fmt::Debug for ActivatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivatorRegistry")
            .field("worlds", &self.worlds.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TriggerFilter::Material("stone".into()), Payload::new().with("material", "STONE"), true)]
    #[case(TriggerFilter::Material("stone".into()), Payload::new().with("material", "dirt"), false)]
    #[case(TriggerFilter::Material("stone".into()), Payload::new(), false)]
    #[case(TriggerFilter::Keyword("Hello".into()), Payload::new().with("message", "well hello there"), true)]
    #[case(TriggerFilter::Keyword("hello".into()), Payload::new().with("message", "bye"), false)]
    #[case(TriggerFilter::Interval(20), Payload::new().with("tick", 40i64), true)]
    #[case(TriggerFilter::Interval(20), Payload::new().with("tick", 41i64), false)]
    #[case(TriggerFilter::Interval(20), Payload::new().with("tick", "40"), false)]
    fn test_filter_accepts(#[case] filter: TriggerFilter, #[case] payload: Payload, #[case] expected: bool) {
        assert_eq!(filter.accepts(&payload), expected);
    }

    #[test]
    fn test_skip_admits_one_at_a_time() {
        let counter = Arc::new(AtomicUsize::new(0));
        let first = InFlight::admit(&counter, OverlapPolicy::Skip);
        assert!(first.is_some());
        assert!(InFlight::admit(&counter, OverlapPolicy::Skip).is_none());

        let overlapping = InFlight::admit(&counter, OverlapPolicy::Allow);
        assert_eq!(counter.load(Ordering::Acquire), 2);
        drop(overlapping);
        drop(first);
        assert_eq!(counter.load(Ordering::Acquire), 0);
        assert!(InFlight::admit(&counter, OverlapPolicy::Skip).is_some());
    }

    #[test]
    fn test_skip_admission_is_exclusive_across_threads() {
        let counter = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    InFlight::admit(&counter, OverlapPolicy::Skip)
                })
            })
            .collect();
        let guards: Vec<_> = threads
            .into_iter()
            .filter_map(|t| t.join().unwrap())
            .collect();
        assert_eq!(guards.len(), 1);
        assert_eq!(counter.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_interval_key() {
        assert_eq!(interval_of("tick-interval:20"), Some(20));
        assert_eq!(interval_of("tick-interval:0"), None);
        assert_eq!(interval_of("tick-interval:x"), None);
        assert_eq!(interval_of("chat"), None);
    }
}
