//! Provider that creates, initializes and releases store-backed tiers.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use stratum_core::{
    resolve_clock, ArgumentError, CacheKey, CacheValue, LowerCachingTierProvider, ManagedTier,
    ResourcePool, ServiceConfig, StorageEngine, StoreConfig, StratumError, StratumResult, TierId,
    TierState,
};

use crate::lmdb::LmdbEngine;
use crate::memory::MemoryEngine;
use crate::tier::StoreBackedTier;

/// Builds tiers over the engine selected by each config's resource pool.
///
/// | Resource pool | Engine         |
/// |---------------|----------------|
/// | `Heap`        | `MemoryEngine` |
/// | `Disk`        | `LmdbEngine`   |
///
/// The provider tracks every tier it created until that tier is released.
/// Tiers it did not create are rejected with `ArgumentError::UnknownTier`.
#[derive(Default)]
pub struct StoreTierProvider {
    tiers: Mutex<HashMap<TierId, Arc<dyn ManagedTier>>>,
}

impl StoreTierProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tiers created and not yet released.
    pub fn tier_count(&self) -> usize {
        self.tiers.lock().len()
    }

    /// Whether `tier_id` belongs to a live tier of this provider.
    pub fn manages(&self, tier_id: TierId) -> bool {
        self.tiers.lock().contains_key(&tier_id)
    }

    /// Release every tier still registered.
    ///
    /// Every tier is released even if some fail; the first failure is returned.
    pub fn shutdown(&self) -> StratumResult<()> {
        let drained: Vec<_> = self.tiers.lock().drain().collect();
        let mut first_error = None;

        for (tier_id, tier) in drained {
            match tier.close() {
                Ok(()) => tracing::info!(%tier_id, "Released caching tier on shutdown"),
                Err(e) => {
                    tracing::warn!(%tier_id, error = %e, "Failed to release caching tier on shutdown");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn lookup(&self, tier_id: TierId) -> Result<Arc<dyn ManagedTier>, ArgumentError> {
        self.tiers
            .lock()
            .get(&tier_id)
            .cloned()
            .ok_or(ArgumentError::UnknownTier { tier_id })
    }
}

impl LowerCachingTierProvider for StoreTierProvider {
    type Tier<K: CacheKey, V: CacheValue> = StoreBackedTier<K, V>;

    fn create_caching_tier<K: CacheKey, V: CacheValue>(
        &self,
        store_config: StoreConfig,
        service_configs: &[ServiceConfig],
    ) -> StratumResult<Arc<StoreBackedTier<K, V>>> {
        let config = store_config.with_service_overrides(service_configs);
        config.validate()?;

        let engine: Arc<dyn StorageEngine<K, V>> = match &config.resource_pool {
            ResourcePool::Heap { entries } => Arc::new(MemoryEngine::with_capacity(*entries)),
            ResourcePool::Disk { path, max_size_mb } => {
                Arc::new(LmdbEngine::new(path.clone(), *max_size_mb))
            }
        };
        let tier = Arc::new(StoreBackedTier::new(
            engine,
            &config,
            resolve_clock(service_configs),
        ));

        let managed: Arc<dyn ManagedTier> = tier.clone();
        self.tiers.lock().insert(tier.tier_id(), managed);

        tracing::info!(
            tier_id = %tier.tier_id(),
            engine = tier.engine_name(),
            concurrency = tier.concurrency(),
            "Created caching tier"
        );
        Ok(tier)
    }

    fn init_caching_tier<K: CacheKey, V: CacheValue>(
        &self,
        tier: &StoreBackedTier<K, V>,
    ) -> StratumResult<()> {
        let tier_id = tier.tier_id();
        if tier.state() == TierState::Released {
            panic!("caching tier {} is released and cannot be initialized", tier_id);
        }
        let managed = self.lookup(tier_id)?;
        managed.open().map_err(|e| {
            tracing::warn!(%tier_id, error = %e, "Failed to open caching tier storage");
            StratumError::from(e)
        })?;
        tracing::info!(%tier_id, "Initialized caching tier");
        Ok(())
    }

    fn release_caching_tier<K: CacheKey, V: CacheValue>(
        &self,
        tier: &StoreBackedTier<K, V>,
    ) -> StratumResult<()> {
        let tier_id = tier.tier_id();
        let managed = self
            .tiers
            .lock()
            .remove(&tier_id)
            .ok_or(ArgumentError::UnknownTier { tier_id })?;
        managed.close()?;
        tracing::info!(%tier_id, "Released caching tier");
        Ok(())
    }
}

impl fmt::Debug for StoreTierProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreTierProvider")
            .field("tiers", &self.tier_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use stratum_core::{Clock, LowerCachingTier, StorageError, TierState};
    use stratum_test_utils::{assertions, fixtures, LoaderProbe, ManualClock};
    use tempfile::TempDir;

    fn heap_tier(provider: &StoreTierProvider) -> Arc<StoreBackedTier<String, u64>> {
        provider
            .create_caching_tier(fixtures::heap_config(), &[])
            .expect("create tier")
    }

    #[test]
    fn test_lifecycle_created_initialized_released() {
        let provider = StoreTierProvider::new();
        let tier = heap_tier(&provider);
        assert_eq!(tier.state(), TierState::Created);
        assert_eq!(provider.tier_count(), 1);

        provider.init_caching_tier(&tier).expect("init");
        assert_eq!(tier.state(), TierState::Initialized);

        provider.release_caching_tier(&tier).expect("release");
        assert_eq!(tier.state(), TierState::Released);
        assert_eq!(provider.tier_count(), 0);
    }

    #[test]
    fn test_foreign_tier_rejected() {
        let ours = StoreTierProvider::new();
        let theirs = StoreTierProvider::new();
        let tier = heap_tier(&theirs);

        assertions::assert_unknown_tier(&ours.init_caching_tier(&tier));
        assertions::assert_unknown_tier(&ours.release_caching_tier(&tier));
        assert_eq!(tier.state(), TierState::Created);
    }

    #[test]
    fn test_double_release_reports_unknown_tier() {
        let provider = StoreTierProvider::new();
        let tier = heap_tier(&provider);
        provider.init_caching_tier(&tier).expect("init");
        provider.release_caching_tier(&tier).expect("release");
        assertions::assert_unknown_tier(&provider.release_caching_tier(&tier));
    }

    #[test]
    fn test_release_without_init() {
        let provider = StoreTierProvider::new();
        let tier = heap_tier(&provider);
        provider.release_caching_tier(&tier).expect("release");
        assert_eq!(tier.state(), TierState::Released);
    }

    #[test]
    #[should_panic(expected = "cannot be initialized")]
    fn test_double_init_panics() {
        let provider = StoreTierProvider::new();
        let tier = heap_tier(&provider);
        provider.init_caching_tier(&tier).expect("init");
        let _ = provider.init_caching_tier(&tier);
    }

    #[test]
    #[should_panic(expected = "is released and cannot be initialized")]
    fn test_init_after_release_panics() {
        let provider = StoreTierProvider::new();
        let tier = heap_tier(&provider);
        provider.init_caching_tier(&tier).expect("init");
        provider.release_caching_tier(&tier).expect("release");
        let _ = provider.init_caching_tier(&tier);
    }

    #[test]
    #[should_panic(expected = "is released and cannot be initialized")]
    fn test_init_after_shutdown_panics() {
        let provider = StoreTierProvider::new();
        let tier = heap_tier(&provider);
        provider.shutdown().expect("shutdown");
        let _ = provider.init_caching_tier(&tier);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let provider = StoreTierProvider::new();
        let result = provider.create_caching_tier::<String, u64>(
            fixtures::heap_config().with_concurrency(3),
            &[],
        );
        assertions::assert_config_error(&result);
        assert_eq!(provider.tier_count(), 0);
    }

    #[test]
    fn test_oversized_disk_pool_rejected_at_creation() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let provider = StoreTierProvider::new();
        let result = provider.create_caching_tier::<String, u64>(
            StoreConfig::new(ResourcePool::disk(temp_dir.path(), usize::MAX / 1024)),
            &[],
        );
        assertions::assert_config_error(&result);
        assert_eq!(provider.tier_count(), 0);
    }

    #[test]
    fn test_service_configs_override_store_config() {
        let provider = StoreTierProvider::new();
        let clock = Arc::new(ManualClock::at_epoch());
        let mut services = fixtures::with_clock(clock.clone());
        services.push(ServiceConfig::Concurrency(2));

        let tier: Arc<StoreBackedTier<String, u64>> = provider
            .create_caching_tier(fixtures::ttl_config(Duration::from_secs(1)), &services)
            .expect("create tier");
        assert_eq!(tier.concurrency(), 2);

        provider.init_caching_tier(&tier).expect("init");
        let holder = tier.new_holder(5);
        assert_eq!(holder.created_at(), clock.now());
    }

    #[test]
    fn test_disk_pool_uses_lmdb() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let provider = StoreTierProvider::new();
        let tier: Arc<StoreBackedTier<String, u64>> = provider
            .create_caching_tier(StoreConfig::new(ResourcePool::disk(temp_dir.path(), 10)), &[])
            .expect("create tier");
        assert_eq!(tier.engine_name(), "lmdb");

        provider.init_caching_tier(&tier).expect("init");
        let probe = LoaderProbe::new();
        let installed = tier
            .install_mapping(&"k".to_string(), probe.loader(tier.new_holder(11)))
            .expect("install")
            .expect("installed");
        assert_eq!(*installed.value(), 11);
        provider.release_caching_tier(&tier).expect("release");
    }

    #[test]
    fn test_init_failure_keeps_tier_created() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").expect("write blocker file");

        let provider = StoreTierProvider::new();
        let tier: Arc<StoreBackedTier<String, u64>> = provider
            .create_caching_tier(StoreConfig::new(ResourcePool::disk(&blocker, 10)), &[])
            .expect("create tier");

        let result = provider.init_caching_tier(&tier);
        assert!(matches!(
            result,
            Err(StratumError::Storage(StorageError::Io { .. }))
        ));
        assert_eq!(tier.state(), TierState::Created);
        assert!(provider.manages(tier.tier_id()));
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let provider = StoreTierProvider::new();
        let first = heap_tier(&provider);
        let second = heap_tier(&provider);
        provider.init_caching_tier(&first).expect("init");

        provider.shutdown().expect("shutdown");
        assert_eq!(provider.tier_count(), 0);
        assert_eq!(first.state(), TierState::Released);
        assert_eq!(second.state(), TierState::Released);
    }
}
