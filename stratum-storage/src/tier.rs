//! Store-backed lower caching tier.
//!
//! `StoreBackedTier` wraps a [`StorageEngine`] and adds what the engine
//! does not provide: per-key atomic compound operations, expiry checks
//! against an injected clock, invalidation notifications, and lifecycle
//! enforcement.
//!
//! # Critical sections
//!
//! Every per-key operation runs while holding the key's stripe (see
//! `striped.rs`). Loaders, invalidation actions and invalidation listeners
//! are called inside that section. `clear` waits for every per-key section
//! to finish and blocks new ones until it returns.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use stratum_core::{
    AccessError, AtomicTierState, CacheKey, CacheValue, Clock, ConfigurationChange,
    ConfigurationChangeListener, ConfigurationChangeSupport, ExpiryPolicy, InvalidationAction,
    InvalidationListener, Loader, LowerCachingTier, ManagedTier, StorageEngine, StorageError,
    StoreConfig, TierId, TierState, ValueHolder,
};

use crate::striped::{StripeGuard, StripedLock};

type SharedListener<K, V> = Arc<dyn InvalidationListener<K, V>>;

/// Lower caching tier over a pluggable storage engine.
pub struct StoreBackedTier<K, V> {
    tier_id: TierId,
    state: AtomicTierState,
    engine: Arc<dyn StorageEngine<K, V>>,
    locks: StripedLock,
    clock: Arc<dyn Clock>,
    expiry: ExpiryPolicy,
    listener: RwLock<Option<SharedListener<K, V>>>,
}

impl<K: CacheKey, V: CacheValue> StoreBackedTier<K, V> {
    /// Build a tier in the `Created` state.
    ///
    /// Only `concurrency` and `expiry` are read from `config`; the engine has
    /// already been built from its resource pool.
    pub fn new(
        engine: Arc<dyn StorageEngine<K, V>>,
        config: &StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tier_id: stratum_core::new_tier_id(),
            state: AtomicTierState::new(TierState::Created),
            engine,
            locks: StripedLock::new(config.concurrency),
            clock,
            expiry: config.expiry,
            listener: RwLock::new(None),
        }
    }

    pub fn tier_id(&self) -> TierId {
        self.tier_id
    }

    pub fn state(&self) -> TierState {
        self.state.load()
    }

    /// Name of the backing engine.
    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Number of lock stripes.
    pub fn concurrency(&self) -> usize {
        self.locks.stripe_count()
    }

    /// Build a holder for `value` stamped with this tier's clock and expiry policy.
    pub fn new_holder(&self, value: V) -> ValueHolder<V> {
        ValueHolder::with_policy(value, self.clock.now(), &self.expiry)
    }

    /// Number of physical mappings, expired ones included.
    pub fn len(&self) -> Result<u64, AccessError> {
        let _shared = self.locks.lock_shared();
        self.assert_live("len");
        Ok(self.engine.len()?)
    }

    pub fn is_empty(&self) -> Result<bool, AccessError> {
        Ok(self.len()? == 0)
    }

    /// Remove every expired mapping, notifying the listener for each.
    ///
    /// Keys are snapshotted first and each is re-checked under its own lock,
    /// so mappings installed during the sweep are left alone. Returns the
    /// number of mappings invalidated.
    pub fn evict_expired(&self) -> Result<u64, AccessError> {
        let _shared = self.locks.lock_shared();
        self.assert_live("evict_expired");
        let keys = self.engine.keys()?;
        let mut evicted = 0u64;

        for key in keys {
            let _guard = self.locks.lock_key(&key);
            let Some(holder) = self.engine.get(&key)? else {
                continue;
            };
            if !holder.is_expired(self.clock.now()) {
                continue;
            }
            if let Some(stale) = self.engine.remove(&key)? {
                self.notify(&key, stale);
                evicted += 1;
            }
        }

        if evicted > 0 {
            tracing::debug!(tier_id = %self.tier_id, evicted, "Evicted expired mappings");
        }
        Ok(evicted)
    }

    #[track_caller]
    fn assert_live(&self, operation: &str) {
        let state = self.state.load();
        if state != TierState::Initialized {
            panic!(
                "caching tier {} is {} and cannot serve {}",
                self.tier_id, state, operation
            );
        }
    }

    /// Lock `key`'s stripe and check the tier is live while holding it.
    ///
    /// `close` takes the gate exclusively, so a tier seen live here stays
    /// live until the guard drops.
    #[track_caller]
    fn lock_live(&self, key: &K, operation: &str) -> StripeGuard<'_> {
        let guard = self.locks.lock_key(key);
        self.assert_live(operation);
        guard
    }

    fn notify(&self, key: &K, holder: Arc<ValueHolder<V>>) {
        // Not held across the call: the listener may replace itself.
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener.on_invalidation(key, holder);
        }
    }

    /// Remove `key` and notify. Caller holds the key's stripe.
    fn invalidate_locked(&self, key: &K) -> Result<(), AccessError> {
        let removed = self.engine.remove(key).map_err(|e| {
            tracing::warn!(tier_id = %self.tier_id, key = ?key, error = %e, "Failed to remove mapping");
            e
        })?;
        if let Some(holder) = removed {
            tracing::debug!(tier_id = %self.tier_id, key = ?key, "Invalidated mapping");
            self.notify(key, holder);
        }
        Ok(())
    }
}

impl<K: CacheKey, V: CacheValue> LowerCachingTier<K, V> for StoreBackedTier<K, V> {
    fn tier_id(&self) -> TierId {
        self.tier_id
    }

    fn install_mapping(
        &self,
        key: &K,
        loader: Loader<'_, K, V>,
    ) -> Result<Option<Arc<ValueHolder<V>>>, AccessError> {
        let _guard = self.lock_live(key, "install_mapping");

        if let Some(existing) = self.engine.get(key)? {
            let now = self.clock.now();
            if !existing.is_expired(now) {
                existing.touch(now);
                return Ok(Some(existing));
            }
            if let Some(stale) = self.engine.remove(key)? {
                tracing::debug!(tier_id = %self.tier_id, key = ?key, "Removed expired mapping before reload");
                self.notify(key, stale);
            }
        }

        let Some(loaded) = loader(key)? else {
            return Ok(None);
        };
        if loaded.is_expired(self.clock.now()) {
            tracing::debug!(tier_id = %self.tier_id, key = ?key, "Loader produced an expired holder, not installing");
            return Ok(None);
        }

        let loaded = Arc::new(loaded);
        self.engine.put(key, Arc::clone(&loaded)).map_err(|e| {
            tracing::warn!(tier_id = %self.tier_id, key = ?key, error = %e, "Failed to install mapping");
            e
        })?;
        tracing::debug!(tier_id = %self.tier_id, key = ?key, "Installed mapping");
        Ok(Some(loaded))
    }

    fn get_and_remove(&self, key: &K) -> Result<Option<Arc<ValueHolder<V>>>, AccessError> {
        let _guard = self.lock_live(key, "get_and_remove");

        let Some(holder) = self.engine.remove(key)? else {
            return Ok(None);
        };
        if holder.is_expired(self.clock.now()) {
            tracing::debug!(tier_id = %self.tier_id, key = ?key, "Removed expired mapping on move");
            self.notify(key, holder);
            return Ok(None);
        }

        tracing::debug!(tier_id = %self.tier_id, key = ?key, "Moved mapping out of tier");
        Ok(Some(holder))
    }

    fn invalidate(&self, key: &K) -> Result<(), AccessError> {
        let _guard = self.lock_live(key, "invalidate");
        self.invalidate_locked(key)
    }

    fn invalidate_with(
        &self,
        key: &K,
        action: InvalidationAction<'_, K>,
    ) -> Result<(), AccessError> {
        let _guard = self.lock_live(key, "invalidate_with");
        self.invalidate_locked(key)?;
        action(key).map_err(|e| {
            tracing::warn!(tier_id = %self.tier_id, key = ?key, error = %e, "Invalidation action failed");
            e
        })
    }

    fn clear(&self) -> Result<(), AccessError> {
        let _exclusive = self.locks.lock_all();
        self.assert_live("clear");
        let removed = self.engine.clear().map_err(|e| {
            tracing::warn!(tier_id = %self.tier_id, error = %e, "Failed to clear tier");
            e
        })?;
        tracing::debug!(tier_id = %self.tier_id, removed, "Cleared tier");
        Ok(())
    }

    fn set_invalidation_listener(&self, listener: Arc<dyn InvalidationListener<K, V>>) {
        let state = self.state.load();
        if state == TierState::Released {
            panic!("caching tier {} is released and cannot accept a listener", self.tier_id);
        }
        *self.listener.write() = Some(listener);
    }
}

impl<K: CacheKey, V: CacheValue> ManagedTier for StoreBackedTier<K, V> {
    fn tier_id(&self) -> TierId {
        self.tier_id
    }

    fn state(&self) -> TierState {
        self.state.load()
    }

    fn open(&self) -> Result<(), StorageError> {
        let state = self.state.load();
        if state != TierState::Created {
            panic!("caching tier {} is {} and cannot be initialized", self.tier_id, state);
        }
        self.engine.open()?;
        if let Err(actual) = self.state.transition(TierState::Created, TierState::Initialized) {
            panic!("caching tier {} is {} and cannot be initialized", self.tier_id, actual);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        let _exclusive = self.locks.lock_all();
        let previous = self.state.replace(TierState::Released);
        if previous == TierState::Released {
            panic!("caching tier {} was already released", self.tier_id);
        }
        *self.listener.write() = None;
        self.engine.close()
    }
}

impl<K: CacheKey, V: CacheValue> ConfigurationChangeSupport for StoreBackedTier<K, V> {
    fn configuration_change_listeners(&self) -> Vec<Arc<dyn ConfigurationChangeListener>> {
        vec![Arc::new(EngineResizeListener {
            tier_id: self.tier_id,
            engine: Arc::clone(&self.engine),
        })]
    }
}

impl<K, V> fmt::Debug for StoreBackedTier<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreBackedTier")
            .field("tier_id", &self.tier_id)
            .field("state", &self.state.load())
            .field("engine", &self.engine.name())
            .field("concurrency", &self.locks.stripe_count())
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Applies resource pool resizes to a tier's engine.
struct EngineResizeListener<K, V> {
    tier_id: TierId,
    engine: Arc<dyn StorageEngine<K, V>>,
}

impl<K, V> ConfigurationChangeListener for EngineResizeListener<K, V> {
    fn on_configuration_change(&self, change: &ConfigurationChange) {
        match change {
            ConfigurationChange::ResourcePoolResized { old, new } => {
                match self.engine.resize(*new) {
                    Ok(()) => tracing::info!(
                        tier_id = %self.tier_id,
                        old = ?old,
                        new = ?new,
                        "Resized tier resource pool"
                    ),
                    Err(e) => tracing::warn!(
                        tier_id = %self.tier_id,
                        engine = self.engine.name(),
                        error = %e,
                        "Ignoring resource pool resize"
                    ),
                }
            }
        }
    }
}
