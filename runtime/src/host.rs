//! Host facade: the entry points the placement layer and the trigger source
//! call.
//!
//! ```text
//! placement edit ──rebuild(world)──▶ GraphBuilder ──▶ ActivatorRegistry::index
//! runtime event  ──dispatch(..)────▶ ActivatorRegistry ──▶ Engine (one task each)
//! ```

use crate::activator::{ActivatorRegistry, WorldIndex};
use crate::bus::Bus;
use crate::context::{Actor, Payload};
use crate::engine::Engine;
use crate::handler::HandlerRegistry;
use crate::report::{InvocationObserver, InvocationReport, TracingObserver};
use crate::store::{MemoryBackend, PersistenceBackend, VariableStore};
use ahash::AHashMap;
use anyhow::Context;
use async_trait::async_trait;
use lodestone_core::{
    ConfigurationError, GraphBuilder, LodestoneConfig, OverlapPolicy, ScriptKey, WorldId,
    WorldSnapshot,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Supplies the current marker layout of a world.
#[async_trait]
pub trait SnapshotProvider: Send + Sync + 'static {
    async fn snapshot(&self, world: &WorldId) -> anyhow::Result<WorldSnapshot>;
}

/// Snapshots kept in memory, replaced by the caller.
#[derive(Debug, Default)]
pub struct InMemorySnapshots {
    worlds: RwLock<AHashMap<WorldId, WorldSnapshot>>,
}

impl InMemorySnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, snapshot: WorldSnapshot) {
        self.worlds.write().insert(snapshot.world.clone(), snapshot);
    }
}

#[async_trait]
impl SnapshotProvider for InMemorySnapshots {
    async fn snapshot(&self, world: &WorldId) -> anyhow::Result<WorldSnapshot> {
        self.worlds
            .read()
            .get(world)
            .cloned()
            .with_context(|| format!("no snapshot for world '{}'", world))
    }
}

/// What a rebuild produced.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildSummary {
    pub world: WorldId,
    pub scripts: usize,
    pub activators: usize,
    /// Scripts that were disabled, with the errors that disabled them.
    pub disabled: Vec<(ScriptKey, Vec<ConfigurationError>)>,
    /// Chain-level problems (rootless chains).
    pub diagnostics: Vec<ConfigurationError>,
}

pub struct Host {
    provider: Arc<dyn SnapshotProvider>,
    builder: GraphBuilder,
    handlers: Arc<HandlerRegistry>,
    store: Arc<VariableStore>,
    registry: ActivatorRegistry,
    overlap: OverlapPolicy,
}

impl Host {
    pub fn builder(provider: Arc<dyn SnapshotProvider>) -> HostBuilder {
        HostBuilder {
            provider,
            config: LodestoneConfig::default(),
            handlers: HandlerRegistry::new(),
            backend: Arc::new(MemoryBackend::new()),
            observer: Arc::new(TracingObserver),
            bus: Bus::new(),
        }
    }

    /// Recompute every script of `world` from a fresh snapshot and swap the
    /// activator index. Invocations already running are not affected.
    pub async fn rebuild(&self, world: &WorldId) -> anyhow::Result<RebuildSummary> {
        let snapshot = self
            .provider
            .snapshot(world)
            .await
            .with_context(|| format!("failed to snapshot world '{}'", world))?;
        Ok(self.rebuild_from(&snapshot))
    }

    /// [`rebuild`](Self::rebuild) from a snapshot already at hand.
    pub fn rebuild_from(&self, snapshot: &WorldSnapshot) -> RebuildSummary {
        let output = self.builder.build(snapshot, self.handlers.as_ref());
        let disabled = output
            .scripts
            .disabled()
            .map(|s| (s.key.clone(), s.errors.clone()))
            .collect();
        let scripts = output.scripts.len();
        let index = self.registry.index(&snapshot.world, output.scripts);

        RebuildSummary {
            world: snapshot.world.clone(),
            scripts,
            activators: index.len(),
            disabled,
            diagnostics: output.diagnostics,
        }
    }

    pub fn dispatch(
        &self,
        world: &WorldId,
        trigger: &str,
        actor: Option<Actor>,
        payload: Payload,
    ) -> Vec<JoinHandle<InvocationReport>> {
        self.registry.dispatch(world, trigger, actor, payload)
    }

    /// Dispatch an interval trigger with the configured overlap policy.
    pub fn dispatch_interval(
        &self,
        world: &WorldId,
        trigger: &str,
        payload: Payload,
    ) -> Vec<JoinHandle<InvocationReport>> {
        self.registry
            .dispatch_with(world, trigger, None, payload, self.overlap)
    }

    pub fn world(&self, world: &WorldId) -> Option<Arc<WorldIndex>> {
        self.registry.world(world)
    }

    /// Forget a deleted world: its activators and its WorldGlobal variables.
    pub async fn remove_world(&self, world: &WorldId) -> anyhow::Result<()> {
        self.registry.remove(world);
        self.store
            .remove_world(world.as_str())
            .await
            .with_context(|| format!("failed to remove variables of world '{}'", world))
    }

    /// A player left: save and drop their persistent variables from memory.
    pub async fn unload_player(&self, player_id: &str) -> anyhow::Result<()> {
        self.store
            .unload_player(player_id)
            .await
            .with_context(|| format!("failed to unload variables of player '{}'", player_id))?;
        Ok(())
    }

    /// A world unloaded: drop its activators, save and drop its WorldGlobal
    /// variables. Running invocations finish.
    pub async fn unload_world(&self, world: &WorldId) -> anyhow::Result<()> {
        self.registry.remove(world);
        self.store
            .unload_world(world.as_str())
            .await
            .with_context(|| format!("failed to unload variables of world '{}'", world))?;
        Ok(())
    }

    /// Cancel running invocations and persist the shared variables.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.registry.shutdown();
        self.store
            .flush()
            .await
            .context("failed to flush variables on shutdown")?;
        Ok(())
    }

    pub fn registry(&self) -> &ActivatorRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<VariableStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<Engine> {
        self.registry.engine()
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }
}

pub struct HostBuilder {
    provider: Arc<dyn SnapshotProvider>,
    config: LodestoneConfig,
    handlers: HandlerRegistry,
    backend: Arc<dyn PersistenceBackend>,
    observer: Arc<dyn InvocationObserver>,
    bus: Bus,
}

impl HostBuilder {
    pub fn config(mut self, config: LodestoneConfig) -> Self {
        self.config = config;
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn PersistenceBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn InvocationObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Add a resource visible to every handler.
    pub fn resource<T: Send + Sync + 'static>(mut self, resource: T) -> Self {
        self.bus.insert(resource);
        self
    }

    pub fn build(self) -> Host {
        let handlers = Arc::new(self.handlers);
        let store = Arc::new(VariableStore::new(self.backend));
        let engine = Engine::new(Arc::clone(&handlers), Arc::clone(&store))
            .with_config(self.config.engine.clone())
            .with_observer(self.observer);
        let registry = ActivatorRegistry::new(Arc::new(engine)).with_bus(self.bus);

        Host {
            provider: self.provider,
            builder: GraphBuilder::new(self.config.palette()),
            handlers,
            store,
            registry,
            overlap: self.config.scheduler.overlap,
        }
    }
}
