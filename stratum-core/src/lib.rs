//! Stratum Core - Tier Contracts and Data Types
//!
//! Value holders, configuration, errors and the traits every lower caching
//! tier implementation satisfies. Concrete engines and tiers live in
//! `stratum-storage`.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod expiry;
pub mod holder;
pub mod identity;
pub mod lifecycle;
pub mod tier;

pub use clock::{Clock, SystemClock};
pub use config::{
    disk_map_size, resolve_clock, ResourcePool, ServiceConfig, StoreConfig, DEFAULT_CONCURRENCY,
    MAX_CONCURRENCY,
};
pub use engine::{CacheKey, CacheValue, StorageEngine};
pub use error::{
    AccessError, ArgumentError, ConfigError, StorageError, StratumError, StratumResult,
};
pub use expiry::ExpiryPolicy;
pub use holder::ValueHolder;
pub use identity::{new_tier_id, timestamp_from_millis, TierId, Timestamp};
pub use lifecycle::{AtomicTierState, ManagedTier, TierState};
pub use tier::{
    ConfigurationChange, ConfigurationChangeListener, ConfigurationChangeSupport,
    InvalidationAction, InvalidationListener, Loader, LowerCachingTier, LowerCachingTierProvider,
};
