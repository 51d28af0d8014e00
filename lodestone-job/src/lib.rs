//! Lodestone Job - the game loop.
//!
//! [`TickScheduler`] counts server ticks and fires every `tick-interval:N`
//! trigger of every indexed world. The activator filter decides which ticks
//! match (`tick % N == 0`); the configured [`OverlapPolicy`] decides what
//! happens when the previous run of an activator is still going.

use lodestone_core::{OverlapPolicy, SchedulerConfig};
use lodestone_runtime::{Host, InvocationReport, Payload, interval_of};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub struct TickScheduler {
    host: Arc<Host>,
    config: SchedulerConfig,
    tick: AtomicU64,
    stop: CancellationToken,
}

impl TickScheduler {
    pub fn new(host: Arc<Host>, config: SchedulerConfig) -> Self {
        Self {
            host,
            config,
            tick: AtomicU64::new(0),
            stop: CancellationToken::new(),
        }
    }

    /// Ticks fired so far.
    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    pub fn overlap(&self) -> OverlapPolicy {
        self.config.overlap
    }

    /// Advance one tick and dispatch every interval trigger.
    pub fn tick_once(&self) -> Vec<JoinHandle<InvocationReport>> {
        let tick = self.tick.fetch_add(1, Ordering::AcqRel) + 1;
        let registry = self.host.registry();

        let mut handles = Vec::new();
        for world in registry.worlds() {
            let Some(index) = registry.world(&world) else {
                continue;
            };
            let triggers: Vec<String> = index
                .triggers()
                .filter(|t| interval_of(t).is_some())
                .map(str::to_string)
                .collect();
            for trigger in triggers {
                let payload = Payload::new().with("tick", tick as i64);
                handles.extend(registry.dispatch_with(
                    &world,
                    &trigger,
                    None,
                    payload,
                    self.config.overlap,
                ));
            }
        }
        if !handles.is_empty() {
            tracing::trace!(tick, submitted = handles.len(), "Tick dispatched");
        }
        handles
    }

    /// Run the loop on the current runtime until [`stop`](Self::stop).
    ///
    /// Invocations are detached; their reports go to the host's observer.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.tick());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(tick_ms = self.config.tick_ms, overlap = ?self.config.overlap, "Tick scheduler started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.tick_once();
                    }
                    _ = self.stop.cancelled() => break,
                }
            }
            tracing::info!(ticks = self.current_tick(), "Tick scheduler stopped");
        })
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl std::fmt::Debug for TickScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickScheduler")
            .field("config", &self.config)
            .field("tick", &self.current_tick())
            .finish_non_exhaustive()
    }
}
