//! End-to-end behaviour: snapshot -> rebuild -> dispatch -> report.

use async_trait::async_trait;
use lodestone_core::{
    BlockPos, EngineConfig, LodestoneConfig, OverlapPolicy, Param, ParamSlot, Tier, Value,
    WorldId, WorldSnapshot,
};
use lodestone_runtime::{
    ActionFn, ActionHandler, Actor, CollectingObserver, ConditionFn, ExecutionContext,
    FailureKind, HandlerError, HandlerRegistry, Host, InMemorySnapshots, InvocationReport,
    Params, Payload,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

type Sent = Arc<Mutex<Vec<Value>>>;

struct Sleep;

#[async_trait]
impl ActionHandler for Sleep {
    fn required_params(&self) -> &'static [&'static str] {
        &["ms"]
    }

    async fn invoke(&self, params: Params, _ctx: &mut ExecutionContext) -> Result<(), HandlerError> {
        let ms = params.number("ms")?;
        tokio::time::sleep(Duration::from_millis(ms as u64)).await;
        Ok(())
    }
}

fn handlers(sent: &Sent) -> HandlerRegistry {
    let sink = Arc::clone(sent);
    HandlerRegistry::new()
        .with_action(
            "sendMessage",
            ActionFn::new(&["text"], move |params, _| {
                sink.lock().push(params.value("text")?.clone());
                Ok(())
            }),
        )
        .with_action("sleep", Sleep)
        .with_condition(
            "equals",
            ConditionFn::new(&["left", "right"], |params, _| {
                Ok(params.value("left")? == params.value("right")?)
            }),
        )
}

/// Lays markers out left to right on one row.
struct Row {
    snapshot: WorldSnapshot,
    y: i32,
    x: i32,
}

impl Row {
    fn new(snapshot: WorldSnapshot, y: i32) -> Self {
        Self { snapshot, y, x: 0 }
    }

    fn node(mut self, material: &str, action: &str, params: Vec<ParamSlot>) -> Self {
        let pos = BlockPos::new(self.x, self.y, 0);
        self.snapshot = self.snapshot.place(pos, material).configure(pos, action, params);
        self.x += 1;
        self
    }

    fn close(mut self) -> Self {
        self.snapshot = self
            .snapshot
            .place(BlockPos::new(self.x, self.y, 0), "sticky_piston");
        self.x += 1;
        self
    }

    fn done(self) -> WorldSnapshot {
        self.snapshot
    }
}

fn lit(slot: &str, v: impl Into<Value>) -> ParamSlot {
    ParamSlot::new(slot, Param::literal(v))
}

struct World {
    host: Host,
    id: WorldId,
    sent: Sent,
    observer: Arc<CollectingObserver>,
}

impl World {
    async fn new(snapshot: WorldSnapshot) -> Self {
        Self::with_config(snapshot, LodestoneConfig::default()).await
    }

    async fn with_config(snapshot: WorldSnapshot, config: LodestoneConfig) -> Self {
        let id = snapshot.world.clone();
        let snapshots = Arc::new(InMemorySnapshots::new());
        snapshots.put(snapshot);
        let sent: Sent = Arc::default();
        let observer = Arc::new(CollectingObserver::new());
        let host = Host::builder(snapshots)
            .config(config)
            .handlers(handlers(&sent))
            .observer(observer.clone())
            .build();
        host.rebuild(&id).await.unwrap();
        Self {
            host,
            id,
            sent,
            observer,
        }
    }

    fn dispatch(&self, trigger: &str, payload: Payload) -> Vec<JoinHandle<InvocationReport>> {
        self.host
            .dispatch(&self.id, trigger, Some(Actor::new("u-1", "Alex")), payload)
    }

    async fn run(&self, trigger: &str, payload: Payload) -> Vec<InvocationReport> {
        let mut reports = Vec::new();
        for handle in self.dispatch(trigger, payload) {
            reports.push(handle.await.unwrap());
        }
        reports
    }

    fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }
}

fn greeter() -> WorldSnapshot {
    Row::new(WorldSnapshot::new("overworld"), 0)
        .node("diamond_block", "chat", vec![])
        .node(
            "oak_planks",
            "equals",
            vec![
                ParamSlot::new("left", Param::event("message")),
                lit("right", "hi"),
            ],
        )
        .node("piston", "if", vec![])
        .node("cobblestone", "sendMessage", vec![lit("text", "Hello!")])
        .close()
        .done()
}

#[tokio::test]
async fn test_chat_greeting_sends_once() {
    let world = World::new(greeter()).await;

    let reports = world.run("chat", Payload::new().with("message", "hi")).await;
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_success());
    assert_eq!(world.sent(), vec![Value::from("Hello!")]);
}

#[tokio::test]
async fn test_chat_other_message_sends_nothing() {
    let world = World::new(greeter()).await;

    let reports = world.run("chat", Payload::new().with("message", "bye")).await;
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_success());
    assert!(world.sent().is_empty());
}

#[tokio::test]
async fn test_set_add_get_yields_eight() {
    let snapshot = Row::new(WorldSnapshot::new("overworld"), 0)
        .node("diamond_block", "join", vec![])
        .node("iron_block", "set:local", vec![lit("name", "x"), lit("value", 5i64)])
        .node("iron_block", "add:local", vec![lit("name", "x"), lit("value", 3i64)])
        .node(
            "iron_block",
            "get:local",
            vec![lit("name", "x"), lit("into", "result")],
        )
        .node(
            "cobblestone",
            "sendMessage",
            vec![ParamSlot::new("text", Param::variable(Tier::Local, "result"))],
        )
        .done();
    let world = World::new(snapshot).await;

    let reports = world.run("join", Payload::new()).await;
    assert!(reports[0].is_success(), "{:?}", reports[0].outcome);
    assert_eq!(world.sent(), vec![Value::Number(8.0)]);
}

fn counter() -> WorldSnapshot {
    Row::new(WorldSnapshot::new("overworld"), 0)
        .node("diamond_block", "chat", vec![])
        .node("cobblestone", "sleep", vec![lit("ms", 5i64)])
        .node(
            "iron_block",
            "add:world",
            vec![lit("name", "count"), lit("value", 1i64)],
        )
        .done()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_add_never_loses_updates() {
    let world = World::new(counter()).await;
    let store = world.host.store();
    store
        .set(Tier::WorldGlobal, "overworld", "count", Value::from(0i64))
        .await
        .unwrap();

    let mut handles = world.dispatch("chat", Payload::new());
    handles.extend(world.dispatch("chat", Payload::new()));
    assert_eq!(handles.len(), 2);
    for handle in handles {
        assert!(handle.await.unwrap().is_success());
    }

    let count = store
        .get(Tier::WorldGlobal, "overworld", "count")
        .await
        .unwrap();
    assert_eq!(count, Value::from(2i64));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_adds() {
    let world = World::new(counter()).await;
    let store = world.host.store();
    store
        .set(Tier::WorldGlobal, "overworld", "count", Value::from(0i64))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..200 {
        handles.extend(world.dispatch("chat", Payload::new()));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_success());
    }
    assert_eq!(
        store
            .get(Tier::WorldGlobal, "overworld", "count")
            .await
            .unwrap(),
        Value::from(200i64)
    );
}

fn recursive() -> WorldSnapshot {
    let snapshot = Row::new(WorldSnapshot::new("overworld"), 0)
        .node("diamond_block", "chat", vec![])
        .node("lapis_ore", "spin", vec![])
        .done();
    Row::new(snapshot, 1)
        .node("lapis_block", "spin", vec![])
        .node("lapis_ore", "spin", vec![])
        .done()
}

#[tokio::test]
async fn test_unbounded_recursion_hits_limit() {
    let mut config = LodestoneConfig::default();
    config.engine.max_call_depth = 32;
    let world = World::with_config(recursive(), config).await;

    let reports = world.run("chat", Payload::new()).await;
    let failure = reports[0].failure().unwrap();
    assert_eq!(failure.kind, FailureKind::RecursionLimitExceeded);
    assert_eq!(failure.location.as_ref().unwrap().pos, BlockPos::new(1, 1, 0));
    // 32 calls succeed, the 33rd is refused.
    assert_eq!(reports[0].nodes_executed, 33);
}

#[tokio::test]
async fn test_default_recursion_limit_does_not_touch_host_stack() {
    let world = World::new(recursive()).await;
    let reports = world.run("chat", Payload::new()).await;
    assert_eq!(
        reports[0].failure_kind(),
        Some(FailureKind::RecursionLimitExceeded)
    );
}

#[tokio::test]
async fn test_endless_loop_hits_iteration_cap() {
    let snapshot = Row::new(WorldSnapshot::new("overworld"), 0)
        .node("diamond_block", "chat", vec![])
        .node("iron_block", "set:local", vec![lit("name", "n"), lit("value", 0i64)])
        .node("oak_planks", "equals", vec![lit("left", 1i64), lit("right", 1i64)])
        .node("piston", "while", vec![])
        .node("iron_block", "add:local", vec![lit("name", "n"), lit("value", 1i64)])
        .close()
        .done();
    let mut config = LodestoneConfig::default();
    config.engine = EngineConfig {
        max_loop_iterations: 50,
        ..EngineConfig::default()
    };
    let world = World::with_config(snapshot, config).await;

    let reports = world.run("chat", Payload::new()).await;
    assert_eq!(
        reports[0].failure_kind(),
        Some(FailureKind::LoopBoundExceeded)
    );
}

#[tokio::test]
async fn test_material_filter() {
    let snapshot = Row::new(WorldSnapshot::new("overworld"), 0)
        .node("diamond_block", "blockBreak", vec![lit("material", "stone")])
        .node("cobblestone", "sendMessage", vec![lit("text", "mined")])
        .done();
    let world = World::new(snapshot).await;

    assert!(
        world
            .dispatch("blockBreak", Payload::new().with("material", "dirt"))
            .is_empty()
    );
    let reports = world
        .run("blockBreak", Payload::new().with("material", "stone"))
        .await;
    assert_eq!(reports.len(), 1);
    assert_eq!(world.sent(), vec![Value::from("mined")]);
}

#[tokio::test]
async fn test_unbalanced_script_is_never_dispatched() {
    let snapshot = Row::new(WorldSnapshot::new("overworld"), 0)
        .node("diamond_block", "chat", vec![])
        .node("piston", "repeat", vec![lit("times", 2i64)])
        .node("cobblestone", "sendMessage", vec![lit("text", "x")])
        .done();
    let world = World::new(snapshot.clone()).await;

    let summary = world.host.rebuild_from(&snapshot);
    assert_eq!(summary.scripts, 1);
    assert_eq!(summary.activators, 0);
    assert_eq!(summary.disabled.len(), 1);

    assert!(world.dispatch("chat", Payload::new()).is_empty());
    assert!(world.sent().is_empty());
}

#[tokio::test]
async fn test_disabled_activator_is_skipped() {
    let world = World::new(greeter()).await;
    let index = world.host.world(&world.id).unwrap();
    let id = index.activators("chat")[0].id;

    assert!(world.host.registry().set_enabled(id, false));
    assert!(
        world
            .dispatch("chat", Payload::new().with("message", "hi"))
            .is_empty()
    );

    assert!(world.host.registry().set_enabled(id, true));
    assert_eq!(
        world
            .run("chat", Payload::new().with("message", "hi"))
            .await
            .len(),
        1
    );
}

#[tokio::test]
async fn test_interval_overlap_skips_busy_activator() {
    let snapshot = Row::new(WorldSnapshot::new("overworld"), 0)
        .node("diamond_block", "tick-interval:2", vec![])
        .node("cobblestone", "sleep", vec![lit("ms", 100i64)])
        .done();
    let world = World::new(snapshot).await;
    let registry = world.host.registry();
    let tick = |n: i64| Payload::new().with("tick", n);

    // Odd ticks never match the interval.
    assert!(world.host.dispatch_interval(&world.id, "tick-interval:2", tick(1)).is_empty());

    let first = world.host.dispatch_interval(&world.id, "tick-interval:2", tick(2));
    assert_eq!(first.len(), 1);
    let skipped = world.host.dispatch_interval(&world.id, "tick-interval:2", tick(4));
    assert!(skipped.is_empty());
    let allowed = registry.dispatch_with(
        &world.id,
        "tick-interval:2",
        None,
        tick(4),
        OverlapPolicy::Allow,
    );
    assert_eq!(allowed.len(), 1);

    for handle in first.into_iter().chain(allowed) {
        assert!(handle.await.unwrap().is_success());
    }
    assert_eq!(
        world.host.dispatch_interval(&world.id, "tick-interval:2", tick(6)).len(),
        1
    );
}

#[tokio::test]
async fn test_rebuild_keeps_in_flight_invocation() {
    let snapshot = Row::new(WorldSnapshot::new("overworld"), 0)
        .node("diamond_block", "chat", vec![])
        .node("cobblestone", "sleep", vec![lit("ms", 50i64)])
        .node("cobblestone", "sendMessage", vec![lit("text", "still here")])
        .done();
    let world = World::new(snapshot).await;

    let handles = world.dispatch("chat", Payload::new());
    let summary = world.host.rebuild_from(&WorldSnapshot::new("overworld"));
    assert_eq!(summary.activators, 0);

    for handle in handles {
        assert!(handle.await.unwrap().is_success());
    }
    assert_eq!(world.sent(), vec![Value::from("still here")]);
    assert!(world.dispatch("chat", Payload::new()).is_empty());
}

#[tokio::test]
async fn test_failures_reach_the_observer() {
    let snapshot = Row::new(WorldSnapshot::new("overworld"), 0)
        .node("diamond_block", "chat", vec![])
        .node(
            "iron_block",
            "add:player",
            vec![lit("name", "coins"), lit("value", "ten")],
        )
        .done();
    let world = World::new(snapshot).await;

    world.run("chat", Payload::new()).await;
    let reports = world.observer.take();
    assert_eq!(reports.len(), 1);
    let failure = reports[0].failure().unwrap();
    assert_eq!(failure.kind, FailureKind::TypeMismatch);
    assert_eq!(failure.location.as_ref().unwrap().pos, BlockPos::new(1, 0, 0));
    assert_eq!(reports[0].actor.as_deref(), Some("u-1"));
    assert_eq!(reports[0].trigger.as_deref(), Some("chat"));
}

#[tokio::test]
async fn test_wall_clock_budget_stops_before_next_node() {
    let snapshot = Row::new(WorldSnapshot::new("overworld"), 0)
        .node("diamond_block", "chat", vec![])
        .node("cobblestone", "sleep", vec![lit("ms", 50i64)])
        .node("cobblestone", "sendMessage", vec![lit("text", "too late")])
        .done();
    let mut config = LodestoneConfig::default();
    config.engine = EngineConfig {
        timeout_ms: 10,
        ..EngineConfig::default()
    };
    let world = World::with_config(snapshot, config).await;

    let reports = world.run("chat", Payload::new()).await;
    let failure = reports[0].failure().unwrap();
    assert_eq!(failure.kind, FailureKind::ExecutionTimeout);
    // The running handler finishes; the deadline is enforced at the next node.
    assert_eq!(failure.location.as_ref().unwrap().pos, BlockPos::new(2, 0, 0));
    assert!(reports[0].elapsed >= Duration::from_millis(50));
    assert!(world.sent().is_empty());
}

#[tokio::test]
async fn test_unloaded_player_reloads_from_backend() {
    let snapshot = Row::new(WorldSnapshot::new("overworld"), 0)
        .node("diamond_block", "chat", vec![])
        .node("iron_block", "add:player", vec![lit("name", "coins"), lit("value", 0i64)])
        .done();
    let world = World::new(snapshot.clone()).await;
    let store = world.host.store();
    store
        .set(Tier::PlayerPersistent, "u-1", "coins", Value::from(7i64))
        .await
        .unwrap();
    assert_eq!(store.resident(Tier::PlayerPersistent), 1);

    world.host.unload_player("u-1").await.unwrap();
    assert_eq!(store.resident(Tier::PlayerPersistent), 0);

    // The player comes back: the script sees the saved balance.
    let reports = world.run("chat", Payload::new()).await;
    assert!(reports[0].is_success());
    assert_eq!(
        store.get(Tier::PlayerPersistent, "u-1", "coins").await.unwrap(),
        Value::from(7i64)
    );
    assert_eq!(store.resident(Tier::PlayerPersistent), 1);
}

#[tokio::test]
async fn test_unload_world_drops_activators_keeps_variables() {
    let world = World::new(greeter()).await;
    let store = world.host.store();
    store
        .set(Tier::WorldGlobal, "overworld", "visits", Value::from(3i64))
        .await
        .unwrap();

    world.host.unload_world(&world.id).await.unwrap();
    assert!(world.host.world(&world.id).is_none());
    assert_eq!(store.resident(Tier::WorldGlobal), 0);
    assert_eq!(
        store.get(Tier::WorldGlobal, "overworld", "visits").await.unwrap(),
        Value::from(3i64)
    );
}
