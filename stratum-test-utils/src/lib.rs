//! Stratum Test Utilities
//!
//! Shared test infrastructure for the Stratum workspace:
//! - A manually driven clock for deterministic expiry
//! - Recording listeners and counting loaders
//! - A fault-injecting storage engine
//! - Proptest generators and fixtures for common scenarios
//! - Assertions over Stratum error variants

pub use stratum_core::{
    AccessError, ArgumentError, CacheKey, Clock, ConfigError, ExpiryPolicy, InvalidationAction,
    InvalidationListener, Loader, ResourcePool, ServiceConfig, StorageEngine, StorageError,
    StoreConfig, StratumError, StratumResult, Timestamp, ValueHolder,
};

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// CLOCK
// ============================================================================

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// Create a clock frozen at [`fixtures::epoch`].
    pub fn at_epoch() -> Self {
        Self::new(fixtures::epoch())
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let millis = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(millis, Ordering::AcqRel);
    }

    /// Jump to an absolute time.
    pub fn set(&self, to: Timestamp) {
        self.millis.store(to.timestamp_millis(), Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        stratum_core::timestamp_from_millis(self.millis.load(Ordering::Acquire))
    }
}

// ============================================================================
// LISTENERS AND LOADERS
// ============================================================================

/// Invalidation listener that records every notification in order.
pub struct RecordingListener<K, V> {
    events: Mutex<Vec<(K, Arc<ValueHolder<V>>)>>,
}

impl<K, V> RecordingListener<K, V> {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Number of notifications received.
    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    /// Forget every recorded notification.
    pub fn reset(&self) {
        self.events.lock().clear();
    }
}

impl<K: Clone, V> RecordingListener<K, V> {
    /// Recorded notifications, oldest first.
    pub fn events(&self) -> Vec<(K, Arc<ValueHolder<V>>)> {
        self.events.lock().clone()
    }

    /// Keys of the recorded notifications, oldest first.
    pub fn keys(&self) -> Vec<K> {
        self.events.lock().iter().map(|(key, _)| key.clone()).collect()
    }
}

impl<K: Clone, V: Clone> RecordingListener<K, V> {
    /// Recorded `(key, value)` pairs, oldest first.
    pub fn values(&self) -> Vec<(K, V)> {
        self.events
            .lock()
            .iter()
            .map(|(key, holder)| (key.clone(), holder.value().clone()))
            .collect()
    }
}

impl<K, V> Default for RecordingListener<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for RecordingListener<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingListener")
            .field("count", &self.count())
            .finish()
    }
}

impl<K, V> InvalidationListener<K, V> for RecordingListener<K, V>
where
    K: Clone + Send + Sync,
    V: Send + Sync,
{
    fn on_invalidation(&self, key: &K, holder: Arc<ValueHolder<V>>) {
        self.events.lock().push((key.clone(), holder));
    }
}

/// Hands out loaders and invalidation actions that count their calls.
#[derive(Debug, Default)]
pub struct LoaderProbe {
    calls: AtomicUsize,
}

impl LoaderProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many loaders or actions from this probe have run.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }

    /// Loader that installs `holder`.
    pub fn loader<'a, K, V: 'a>(&'a self, holder: ValueHolder<V>) -> Loader<'a, K, V> {
        Box::new(move |_key: &K| {
            self.calls.fetch_add(1, Ordering::AcqRel);
            Ok(Some(holder))
        })
    }

    /// Loader that declines to install anything.
    pub fn empty_loader<'a, K, V: 'a>(&'a self) -> Loader<'a, K, V> {
        Box::new(move |_key: &K| {
            self.calls.fetch_add(1, Ordering::AcqRel);
            Ok(None)
        })
    }

    /// Loader that fails with `AccessError::Loader`.
    pub fn failing_loader<'a, K, V: 'a>(&'a self, reason: &'a str) -> Loader<'a, K, V> {
        Box::new(move |_key: &K| {
            self.calls.fetch_add(1, Ordering::AcqRel);
            Err(AccessError::loader(reason))
        })
    }

    /// Invalidation action that succeeds.
    pub fn action<'a, K>(&'a self) -> InvalidationAction<'a, K> {
        Box::new(move |_key: &K| {
            self.calls.fetch_add(1, Ordering::AcqRel);
            Ok(())
        })
    }

    /// Invalidation action that fails with `AccessError::Action`.
    pub fn failing_action<'a, K>(&'a self, reason: &'a str) -> InvalidationAction<'a, K> {
        Box::new(move |_key: &K| {
            self.calls.fetch_add(1, Ordering::AcqRel);
            Err(AccessError::action(reason))
        })
    }
}

// ============================================================================
// FAULT-INJECTING ENGINE
// ============================================================================

/// Engine operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Get,
    Put,
    Remove,
    Keys,
    Clear,
}

/// In-memory engine that fails chosen operations once on demand.
///
/// A failed operation leaves the stored data untouched.
pub struct FaultyEngine<K, V> {
    entries: Mutex<HashMap<K, Arc<ValueHolder<V>>>>,
    armed: Mutex<HashSet<FaultPoint>>,
}

impl<K, V> FaultyEngine<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            armed: Mutex::new(HashSet::new()),
        }
    }

    /// Make the next call through `point` fail with `StorageError::Io`.
    pub fn fail_next(&self, point: FaultPoint) {
        self.armed.lock().insert(point);
    }

    /// Whether a fault is still waiting to fire at `point`.
    pub fn is_armed(&self, point: FaultPoint) -> bool {
        self.armed.lock().contains(&point)
    }

    fn trip(&self, point: FaultPoint) -> Result<(), StorageError> {
        if self.armed.lock().remove(&point) {
            return Err(StorageError::Io {
                reason: format!("injected {:?} fault", point),
            });
        }
        Ok(())
    }
}

impl<K, V> Default for FaultyEngine<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey, V: Send + Sync> StorageEngine<K, V> for FaultyEngine<K, V> {
    fn name(&self) -> &'static str {
        "faulty"
    }

    fn open(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        self.entries.lock().clear();
        Ok(())
    }

    fn get(&self, key: &K) -> Result<Option<Arc<ValueHolder<V>>>, StorageError> {
        self.trip(FaultPoint::Get)?;
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &K, holder: Arc<ValueHolder<V>>) -> Result<(), StorageError> {
        self.trip(FaultPoint::Put)?;
        self.entries.lock().insert(key.clone(), holder);
        Ok(())
    }

    fn remove(&self, key: &K) -> Result<Option<Arc<ValueHolder<V>>>, StorageError> {
        self.trip(FaultPoint::Remove)?;
        Ok(self.entries.lock().remove(key))
    }

    fn keys(&self) -> Result<Vec<K>, StorageError> {
        self.trip(FaultPoint::Keys)?;
        Ok(self.entries.lock().keys().cloned().collect())
    }

    fn clear(&self) -> Result<u64, StorageError> {
        self.trip(FaultPoint::Clear)?;
        let mut entries = self.entries.lock();
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }

    fn len(&self) -> Result<u64, StorageError> {
        Ok(self.entries.lock().len() as u64)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Stratum inputs.

    use super::*;
    use proptest::prelude::*;

    /// One step against a tier in a model-based test.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum TierOp {
        Install {
            key: String,
            value: u32,
            ttl_ms: Option<u64>,
        },
        GetAndRemove {
            key: String,
        },
        Invalidate {
            key: String,
        },
        Clear,
        Advance {
            ms: u64,
        },
    }

    /// Keys from a small space so operations collide.
    pub fn arb_key() -> impl Strategy<Value = String> {
        (0u8..8).prop_map(|n| format!("k{}", n))
    }

    /// No expiry, or a time-to-live of up to a minute.
    pub fn arb_expiry_policy() -> impl Strategy<Value = ExpiryPolicy> {
        prop_oneof![
            Just(ExpiryPolicy::NoExpiry),
            (1u64..60_000).prop_map(|ms| ExpiryPolicy::time_to_live(Duration::from_millis(ms))),
        ]
    }

    /// A single tier operation, weighted towards installs.
    pub fn arb_tier_op() -> impl Strategy<Value = TierOp> {
        prop_oneof![
            4 => (arb_key(), any::<u32>(), proptest::option::of(1u64..500))
                .prop_map(|(key, value, ttl_ms)| TierOp::Install { key, value, ttl_ms }),
            2 => arb_key().prop_map(|key| TierOp::GetAndRemove { key }),
            2 => arb_key().prop_map(|key| TierOp::Invalidate { key }),
            1 => Just(TierOp::Clear),
            2 => (1u64..300).prop_map(|ms| TierOp::Advance { ms }),
        ]
    }

    /// A sequence of tier operations.
    pub fn arb_tier_ops(max_len: usize) -> impl Strategy<Value = Vec<TierOp>> {
        proptest::collection::vec(arb_tier_op(), 1..max_len)
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built configs and holders for common testing scenarios.

    use super::*;

    /// Fixed reference instant used by [`ManualClock::at_epoch`].
    pub fn epoch() -> Timestamp {
        Utc.timestamp_millis_opt(1_700_000_000_000)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Unbounded heap pool, no expiry, small stripe count.
    pub fn heap_config() -> StoreConfig {
        StoreConfig::new(ResourcePool::unbounded_heap()).with_concurrency(8)
    }

    /// Heap pool bounded to `entries` mappings.
    pub fn bounded_heap_config(entries: u64) -> StoreConfig {
        StoreConfig::new(ResourcePool::heap(entries)).with_concurrency(8)
    }

    /// Heap pool whose holders live for `ttl`.
    pub fn ttl_config(ttl: Duration) -> StoreConfig {
        heap_config().with_expiry(ExpiryPolicy::time_to_live(ttl))
    }

    /// Service configs that route time through `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Vec<ServiceConfig> {
        vec![ServiceConfig::TimeSource(clock)]
    }

    /// A holder that never expires.
    pub fn holder<V>(value: V, now: Timestamp) -> ValueHolder<V> {
        ValueHolder::new(value, now)
    }

    /// A holder that expires `ttl` after `now`.
    pub fn expiring_holder<V>(value: V, now: Timestamp, ttl: Duration) -> ValueHolder<V> {
        ValueHolder::with_policy(value, now, &ExpiryPolicy::time_to_live(ttl))
    }

    /// A holder whose deadline is already in the past at `now`.
    pub fn expired_holder<V>(value: V, now: Timestamp) -> ValueHolder<V> {
        ValueHolder::with_expiry(value, now, Some(now - chrono::Duration::milliseconds(1)))
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over Stratum error variants.

    use super::*;

    /// Assert that an access result failed in the storage engine.
    #[track_caller]
    pub fn assert_storage_failure<T: fmt::Debug>(result: &Result<T, AccessError>) {
        match result {
            Err(AccessError::Storage(_)) => {}
            other => panic!("Expected Storage access error, got: {:?}", other),
        }
    }

    /// Assert that an access result carries a loader failure.
    #[track_caller]
    pub fn assert_loader_failure<T: fmt::Debug>(result: &Result<T, AccessError>) {
        match result {
            Err(AccessError::Loader { .. }) => {}
            other => panic!("Expected Loader error, got: {:?}", other),
        }
    }

    /// Assert that an access result carries an invalidation action failure.
    #[track_caller]
    pub fn assert_action_failure<T: fmt::Debug>(result: &Result<T, AccessError>) {
        match result {
            Err(AccessError::Action { .. }) => {}
            other => panic!("Expected Action error, got: {:?}", other),
        }
    }

    /// Assert that a provider rejected a tier it does not own.
    #[track_caller]
    pub fn assert_unknown_tier<T: fmt::Debug>(result: &StratumResult<T>) {
        match result {
            Err(StratumError::Argument(ArgumentError::UnknownTier { .. })) => {}
            other => panic!("Expected UnknownTier argument error, got: {:?}", other),
        }
    }

    /// Assert that a provider rejected a configuration.
    #[track_caller]
    pub fn assert_config_error<T: fmt::Debug>(result: &StratumResult<T>) {
        match result {
            Err(StratumError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
