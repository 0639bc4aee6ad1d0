//! Lower caching tier contract.
//!
//! The lower tier is the authoritative store behind a fast upper tier.
//! Every compound operation is atomic per key: concurrent callers for the
//! same key observe a single total order, callers for different keys do
//! not wait on each other (except during `clear`).
//!
//! # Caller obligations
//!
//! Loaders, invalidation actions and invalidation listeners run inside the
//! per-key critical section. They must not call back into the same tier;
//! implementations are allowed to panic when they detect it.

use std::sync::Arc;

use crate::config::{ServiceConfig, StoreConfig};
use crate::engine::{CacheKey, CacheValue};
use crate::error::{AccessError, StratumResult};
use crate::holder::ValueHolder;
use crate::TierId;

/// Computes the holder to install for a key that has no valid mapping.
///
/// Returning `Ok(None)` installs nothing.
pub type Loader<'a, K, V> = Box<dyn FnOnce(&K) -> Result<Option<ValueHolder<V>>, AccessError> + 'a>;

/// Compensating step run under the same per-key lock as an invalidation.
pub type InvalidationAction<'a, K> = Box<dyn FnOnce(&K) -> Result<(), AccessError> + 'a>;

/// Notified synchronously whenever a mapping is removed as a true
/// invalidation (explicit invalidate, or expiry discovered by any
/// operation). Never called for the ownership transfer performed by
/// `get_and_remove` on a valid mapping, nor by `clear`.
pub trait InvalidationListener<K, V>: Send + Sync {
    fn on_invalidation(&self, key: &K, holder: Arc<ValueHolder<V>>);
}

impl<K, V, F> InvalidationListener<K, V> for F
where
    F: Fn(&K, Arc<ValueHolder<V>>) + Send + Sync,
{
    fn on_invalidation(&self, key: &K, holder: Arc<ValueHolder<V>>) {
        self(key, holder)
    }
}

/// A runtime change to a tier's configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationChange {
    /// The entry capacity of the resource pool changed.
    ResourcePoolResized { old: Option<u64>, new: Option<u64> },
}

/// Reacts to configuration changes pushed by the owning cache.
pub trait ConfigurationChangeListener: Send + Sync {
    fn on_configuration_change(&self, change: &ConfigurationChange);
}

/// Components that accept runtime configuration changes.
pub trait ConfigurationChangeSupport {
    /// Listeners the owner must notify when configuration changes.
    fn configuration_change_listeners(&self) -> Vec<Arc<dyn ConfigurationChangeListener>>;
}

/// The authoritative lower tier of a multi-tier cache.
pub trait LowerCachingTier<K, V>: ConfigurationChangeSupport + Send + Sync {
    /// Identity used by the owning provider.
    fn tier_id(&self) -> TierId;

    /// Return the valid holder for `key`, or install and return the result
    /// of `loader`.
    ///
    /// The loader runs at most once, and only when no valid mapping exists.
    /// An expired mapping is removed and reported to the invalidation
    /// listener before the loader runs, all under the key's lock.
    fn install_mapping(
        &self,
        key: &K,
        loader: Loader<'_, K, V>,
    ) -> Result<Option<Arc<ValueHolder<V>>>, AccessError>;

    /// Atomically read and remove the mapping for `key`.
    ///
    /// A valid holder is handed over without notifying the listener. An
    /// expired one is removed, reported, and `None` is returned.
    fn get_and_remove(&self, key: &K) -> Result<Option<Arc<ValueHolder<V>>>, AccessError>;

    /// Remove the mapping for `key`, notifying the listener if one existed.
    fn invalidate(&self, key: &K) -> Result<(), AccessError>;

    /// Remove the mapping for `key`, then run `action` under the same lock
    /// whether or not a mapping existed.
    ///
    /// An action failure is returned but the removal is not rolled back.
    fn invalidate_with(&self, key: &K, action: InvalidationAction<'_, K>)
        -> Result<(), AccessError>;

    /// Remove every mapping. No per-key notifications are fired.
    fn clear(&self) -> Result<(), AccessError>;

    /// Replace the invalidation listener.
    fn set_invalidation_listener(&self, listener: Arc<dyn InvalidationListener<K, V>>);
}

/// Factory and lifecycle manager for lower caching tiers.
pub trait LowerCachingTierProvider: Send + Sync {
    /// Concrete tier type produced by this provider.
    type Tier<K: CacheKey, V: CacheValue>: LowerCachingTier<K, V>;

    /// Allocate a tier bound to the storage described by `store_config`.
    /// The tier is not usable until initialized.
    fn create_caching_tier<K: CacheKey, V: CacheValue>(
        &self,
        store_config: StoreConfig,
        service_configs: &[ServiceConfig],
    ) -> StratumResult<Arc<Self::Tier<K, V>>>;

    /// Open the tier's storage and make it live.
    ///
    /// # Panics
    ///
    /// Panics if the tier is already initialized or has been released.
    fn init_caching_tier<K: CacheKey, V: CacheValue>(
        &self,
        tier: &Self::Tier<K, V>,
    ) -> StratumResult<()>;

    /// Tear down the tier's storage. Fails with `ArgumentError` if this
    /// provider did not create `tier`.
    fn release_caching_tier<K: CacheKey, V: CacheValue>(
        &self,
        tier: &Self::Tier<K, V>,
    ) -> StratumResult<()>;
}
