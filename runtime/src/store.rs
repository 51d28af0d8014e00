//! # Variable Store
//!
//! Keyed state shared by executing scripts, one map per shared tier
//! (PlayerPersistent, WorldGlobal, ServerGlobal). Local variables live in the
//! [`ExecutionContext`](crate::context::ExecutionContext) and never reach
//! this store.
//!
//! Each tier is split into shards by scope key. A scope (one player, one
//! world, the server) lives entirely in one shard, so a read-modify-write of
//! one key runs under one write lock and can never lose an update.
//!
//! Scopes are loaded lazily from a [`PersistenceBackend`] on first access and
//! written back by [`VariableStore::flush`]. A player who leaves (or a world
//! that unloads) is dropped from memory with `unload_player`/`unload_world`.

use crate::error::{ExecutionError, StoreError};
use ahash::{AHashMap, AHashSet, RandomState};
use async_trait::async_trait;
use lodestone_core::{Tier, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::Arc;

/// External storage for shared tiers.
#[async_trait]
pub trait PersistenceBackend: Send + Sync + 'static {
    async fn load(&self, tier: Tier, scope: &str) -> Result<HashMap<String, Value>, StoreError>;

    async fn save(
        &self,
        tier: Tier,
        scope: &str,
        vars: HashMap<String, Value>,
    ) -> Result<(), StoreError>;

    async fn delete(&self, tier: Tier, scope: &str) -> Result<(), StoreError> {
        self.save(tier, scope, HashMap::new()).await
    }
}

/// In-process backend. Data lives as long as the backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: Mutex<AHashMap<(Tier, String), HashMap<String, Value>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a scope, e.g. with data from a previous session.
    pub fn with_scope(self, tier: Tier, scope: impl Into<String>, vars: HashMap<String, Value>) -> Self {
        self.data.lock().insert((tier, scope.into()), vars);
        self
    }

    pub fn stored(&self, tier: Tier, scope: &str) -> Option<HashMap<String, Value>> {
        self.data.lock().get(&(tier, scope.to_string())).cloned()
    }
}

#[async_trait]
impl PersistenceBackend for MemoryBackend {
    async fn load(&self, tier: Tier, scope: &str) -> Result<HashMap<String, Value>, StoreError> {
        Ok(self.stored(tier, scope).unwrap_or_default())
    }

    async fn save(
        &self,
        tier: Tier,
        scope: &str,
        vars: HashMap<String, Value>,
    ) -> Result<(), StoreError> {
        self.data.lock().insert((tier, scope.to_string()), vars);
        Ok(())
    }

    async fn delete(&self, tier: Tier, scope: &str) -> Result<(), StoreError> {
        self.data.lock().remove(&(tier, scope.to_string()));
        Ok(())
    }
}

const SHARDS: usize = 16;

type Scope = AHashMap<String, Value>;

struct TierMap {
    tier: Tier,
    hasher: RandomState,
    shards: Vec<RwLock<AHashMap<String, Scope>>>,
    dirty: Mutex<AHashSet<String>>,
}

impl TierMap {
    fn new(tier: Tier) -> Self {
        Self {
            tier,
            hasher: RandomState::new(),
            shards: (0..SHARDS).map(|_| RwLock::new(AHashMap::new())).collect(),
            dirty: Mutex::new(AHashSet::new()),
        }
    }

    fn shard(&self, scope: &str) -> &RwLock<AHashMap<String, Scope>> {
        let idx = (self.hasher.hash_one(scope) as usize) % self.shards.len();
        &self.shards[idx]
    }

    fn is_loaded(&self, scope: &str) -> bool {
        self.shard(scope).read().contains_key(scope)
    }

    fn mark_dirty(&self, scope: &str) {
        self.dirty.lock().insert(scope.to_string());
    }
}

pub struct VariableStore {
    backend: Arc<dyn PersistenceBackend>,
    player: TierMap,
    world: TierMap,
    server: TierMap,
}

impl Default for VariableStore {
    fn default() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }
}

impl VariableStore {
    pub fn new(backend: Arc<dyn PersistenceBackend>) -> Self {
        Self {
            backend,
            player: TierMap::new(Tier::PlayerPersistent),
            world: TierMap::new(Tier::WorldGlobal),
            server: TierMap::new(Tier::ServerGlobal),
        }
    }

    fn tier(&self, tier: Tier) -> Result<&TierMap, StoreError> {
        match tier {
            Tier::PlayerPersistent => Ok(&self.player),
            Tier::WorldGlobal => Ok(&self.world),
            Tier::ServerGlobal => Ok(&self.server),
            Tier::Local => Err(StoreError::NotShared(tier)),
        }
    }

    /// Make sure `scope` is resident, loading it from the backend if needed.
    ///
    /// Two tasks may race to load the same scope; the first one to install
    /// its data wins and the other copy is dropped.
    async fn ensure_loaded(&self, map: &TierMap, scope: &str) -> Result<(), StoreError> {
        if map.is_loaded(scope) {
            return Ok(());
        }
        let loaded = self.backend.load(map.tier, scope).await?;
        tracing::debug!(tier = %map.tier, scope, vars = loaded.len(), "Loaded variable scope");
        map.shard(scope)
            .write()
            .entry(scope.to_string())
            .or_insert_with(|| loaded.into_iter().collect());
        Ok(())
    }

    /// Read a variable. Unset variables read as [`Value::Unresolved`].
    pub async fn get(&self, tier: Tier, scope: &str, name: &str) -> Result<Value, StoreError> {
        let map = self.tier(tier)?;
        self.ensure_loaded(map, scope).await?;
        let shard = map.shard(scope).read();
        Ok(shard
            .get(scope)
            .and_then(|vars| vars.get(name))
            .cloned()
            .unwrap_or_default())
    }

    pub async fn set(
        &self,
        tier: Tier,
        scope: &str,
        name: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        let map = self.tier(tier)?;
        self.ensure_loaded(map, scope).await?;
        let mut shard = map.shard(scope).write();
        shard
            .entry(scope.to_string())
            .or_default()
            .insert(name.to_string(), value);
        // Marked under the shard lock so an unload cannot slip in between.
        map.mark_dirty(scope);
        Ok(())
    }

    /// Atomic read-modify-write of one key.
    ///
    /// `f` runs under the shard's write lock, so it must not block. If it
    /// fails the stored value is left untouched.
    pub async fn update<F>(
        &self,
        tier: Tier,
        scope: &str,
        name: &str,
        f: F,
    ) -> Result<Value, ExecutionError>
    where
        F: FnOnce(&Value) -> Result<Value, ExecutionError>,
    {
        let map = self.tier(tier)?;
        self.ensure_loaded(map, scope).await?;
        let updated = {
            let mut shard = map.shard(scope).write();
            let vars = shard.entry(scope.to_string()).or_default();
            let current = vars.get(name).cloned().unwrap_or_default();
            let updated = f(&current)?;
            vars.insert(name.to_string(), updated.clone());
            map.mark_dirty(scope);
            updated
        };
        Ok(updated)
    }

    /// Save every scope modified since the last flush.
    pub async fn flush(&self) -> Result<usize, StoreError> {
        let mut saved = 0;
        for map in [&self.player, &self.world, &self.server] {
            let scopes: Vec<String> = map.dirty.lock().drain().collect();
            for scope in scopes {
                let vars: Option<HashMap<String, Value>> = map
                    .shard(&scope)
                    .read()
                    .get(&scope)
                    .map(|vars| vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
                // Unloaded or removed since it was marked; it owns its own save.
                let Some(vars) = vars else {
                    continue;
                };
                if let Err(e) = self.backend.save(map.tier, &scope, vars).await {
                    map.mark_dirty(&scope);
                    return Err(e);
                }
                saved += 1;
            }
        }
        tracing::debug!(scopes = saved, "Flushed variable store");
        Ok(saved)
    }

    /// Drop every variable of a scope. The empty scope is saved on the next flush.
    pub fn clear(&self, tier: Tier, scope: &str) -> Result<(), StoreError> {
        let map = self.tier(tier)?;
        let mut shard = map.shard(scope).write();
        shard.insert(scope.to_string(), AHashMap::new());
        map.mark_dirty(scope);
        Ok(())
    }

    /// Forget a player's persistent variables, in memory and in the backend.
    pub async fn remove_player(&self, player_id: &str) -> Result<(), StoreError> {
        self.remove(Tier::PlayerPersistent, player_id).await
    }

    /// Forget a deleted world's global variables.
    pub async fn remove_world(&self, world: &str) -> Result<(), StoreError> {
        self.remove(Tier::WorldGlobal, world).await
    }

    async fn remove(&self, tier: Tier, scope: &str) -> Result<(), StoreError> {
        let map = self.tier(tier)?;
        map.shard(scope).write().remove(scope);
        map.dirty.lock().remove(scope);
        self.backend.delete(tier, scope).await?;
        tracing::info!(%tier, scope, "Removed variable scope");
        Ok(())
    }

    /// Save a player's scope if it has unsaved changes and drop it from
    /// memory. The next access loads it from the backend again.
    pub async fn unload_player(&self, player_id: &str) -> Result<bool, StoreError> {
        self.unload(Tier::PlayerPersistent, player_id).await
    }

    /// [`unload_player`](Self::unload_player) for a world's global variables.
    pub async fn unload_world(&self, world: &str) -> Result<bool, StoreError> {
        self.unload(Tier::WorldGlobal, world).await
    }

    /// Returns `false` if the scope was not resident.
    async fn unload(&self, tier: Tier, scope: &str) -> Result<bool, StoreError> {
        let map = self.tier(tier)?;
        let (vars, dirty) = {
            let mut shard = map.shard(scope).write();
            let Some(vars) = shard.remove(scope) else {
                return Ok(false);
            };
            (vars, map.dirty.lock().remove(scope))
        };

        if dirty {
            let saved: HashMap<String, Value> =
                vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            if let Err(e) = self.backend.save(tier, scope, saved).await {
                // Put the data back so the next flush can retry.
                map.shard(scope)
                    .write()
                    .entry(scope.to_string())
                    .or_insert(vars);
                map.mark_dirty(scope);
                return Err(e);
            }
        }
        tracing::debug!(%tier, scope, dirty, "Unloaded variable scope");
        Ok(true)
    }

    /// Scopes of `tier` currently held in memory.
    pub fn resident(&self, tier: Tier) -> usize {
        match self.tier(tier) {
            Ok(map) => map.shards.iter().map(|shard| shard.read().len()).sum(),
            Err(_) => 0,
        }
    }

    /// Resident variables of a scope (does not load).
    pub fn snapshot(&self, tier: Tier, scope: &str) -> HashMap<String, Value> {
        let Ok(map) = self.tier(tier) else {
            return HashMap::new();
        };
        map.shard(scope)
            .read()
            .get(scope)
            .map(|vars| vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for VariableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableStore").finish_non_exhaustive()
    }
}
