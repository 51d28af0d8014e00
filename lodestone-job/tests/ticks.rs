use lodestone_core::{BlockPos, Param, ParamSlot, SchedulerConfig, WorldId, WorldSnapshot};
use lodestone_job::TickScheduler;
use lodestone_runtime::{ActionFn, HandlerRegistry, Host, InMemorySnapshots};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn counting_host(interval: u64, fired: &Arc<Mutex<Vec<String>>>) -> Arc<Host> {
    let key = format!("tick-interval:{}", interval);
    let snapshot = WorldSnapshot::new("overworld")
        .place(BlockPos::new(0, 0, 0), "diamond_block")
        .configure(BlockPos::new(0, 0, 0), key.as_str(), vec![])
        .place(BlockPos::new(1, 0, 0), "cobblestone")
        .configure(
            BlockPos::new(1, 0, 0),
            "record",
            vec![ParamSlot::new("tick", Param::event("tick"))],
        );
    let snapshots = Arc::new(InMemorySnapshots::new());
    snapshots.put(snapshot.clone());

    let sink = Arc::clone(fired);
    let handlers = HandlerRegistry::new().with_action(
        "record",
        ActionFn::new(&["tick"], move |params, _| {
            sink.lock().push(params.value("tick")?.to_string());
            Ok(())
        }),
    );
    let host = Host::builder(snapshots).handlers(handlers).build();
    host.rebuild_from(&snapshot);
    Arc::new(host)
}

#[tokio::test]
async fn test_interval_fires_on_multiples() {
    let fired = Arc::new(Mutex::new(Vec::new()));
    let host = counting_host(3, &fired);
    let scheduler = TickScheduler::new(host, SchedulerConfig::default());

    for _ in 0..7 {
        for handle in scheduler.tick_once() {
            assert!(handle.await.unwrap().is_success());
        }
    }
    assert_eq!(scheduler.current_tick(), 7);
    assert_eq!(*fired.lock(), vec!["3", "6"]);
}

#[tokio::test(start_paused = true)]
async fn test_loop_runs_until_stopped() {
    let fired = Arc::new(Mutex::new(Vec::new()));
    let host = counting_host(1, &fired);
    let scheduler = Arc::new(TickScheduler::new(
        host.clone(),
        SchedulerConfig {
            tick_ms: 10,
            ..SchedulerConfig::default()
        },
    ));

    let task = Arc::clone(&scheduler).spawn();
    tokio::time::sleep(Duration::from_millis(105)).await;
    scheduler.stop();
    task.await.unwrap();

    let ticks = scheduler.current_tick();
    assert!(ticks >= 5, "only {} ticks", ticks);
    assert!(host.world(&WorldId::from("overworld")).is_some());
}
