//! Configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;
use crate::expiry::ExpiryPolicy;

/// Default number of lock stripes per tier.
pub const DEFAULT_CONCURRENCY: usize = 64;

/// Upper bound on lock stripes per tier.
pub const MAX_CONCURRENCY: usize = 1 << 16;

const BYTES_PER_MB: usize = 1024 * 1024;

/// LMDB map size in bytes for `max_size_mb`, or `None` if it overflows `usize`.
pub fn disk_map_size(max_size_mb: usize) -> Option<usize> {
    max_size_mb.checked_mul(BYTES_PER_MB)
}

/// The storage resource backing a tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourcePool {
    /// In-process heap storage, optionally bounded by entry count.
    Heap { entries: Option<u64> },
    /// Memory-mapped LMDB storage under a directory.
    Disk { path: PathBuf, max_size_mb: usize },
}

impl ResourcePool {
    /// Heap storage bounded to `entries` mappings.
    pub fn heap(entries: u64) -> Self {
        Self::Heap {
            entries: Some(entries),
        }
    }

    /// Heap storage without an entry bound.
    pub fn unbounded_heap() -> Self {
        Self::Heap { entries: None }
    }

    /// LMDB storage at `path` with a map size of `max_size_mb`.
    pub fn disk(path: impl Into<PathBuf>, max_size_mb: usize) -> Self {
        Self::Disk {
            path: path.into(),
            max_size_mb,
        }
    }

    /// Entry capacity, if this pool is bounded by entry count.
    pub fn entry_capacity(&self) -> Option<u64> {
        match self {
            Self::Heap { entries } => *entries,
            Self::Disk { .. } => None,
        }
    }
}

impl Default for ResourcePool {
    fn default() -> Self {
        Self::unbounded_heap()
    }
}

/// Store configuration consumed by providers at tier creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Storage backing the tier.
    pub resource_pool: ResourcePool,
    /// Deadline policy for holders created through the tier.
    pub expiry: ExpiryPolicy,
    /// Number of lock stripes (power of two).
    pub concurrency: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            resource_pool: ResourcePool::default(),
            expiry: ExpiryPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl StoreConfig {
    /// Create a config for the given resource pool with default settings.
    pub fn new(resource_pool: ResourcePool) -> Self {
        Self {
            resource_pool,
            ..Self::default()
        }
    }

    /// Set the expiry policy.
    pub fn with_expiry(mut self, expiry: ExpiryPolicy) -> Self {
        self.expiry = expiry;
        self
    }

    /// Set the lock stripe count.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Apply service-level overrides on top of this config.
    pub fn with_service_overrides(mut self, service_configs: &[ServiceConfig]) -> Self {
        for service_config in service_configs {
            if let ServiceConfig::Concurrency(concurrency) = service_config {
                self.concurrency = *concurrency;
            }
        }
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - concurrency is a power of two in `1..=MAX_CONCURRENCY`
    /// - bounded heap pools hold at least one entry
    /// - disk pools have a path and a positive map size
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0
            || !self.concurrency.is_power_of_two()
            || self.concurrency > MAX_CONCURRENCY
        {
            return Err(ConfigError::InvalidValue {
                field: "concurrency".to_string(),
                value: self.concurrency.to_string(),
                reason: format!("concurrency must be a power of two between 1 and {MAX_CONCURRENCY}"),
            });
        }

        match &self.resource_pool {
            ResourcePool::Heap { entries: Some(0) } => Err(ConfigError::InvalidValue {
                field: "resource_pool.entries".to_string(),
                value: "0".to_string(),
                reason: "a bounded heap pool must hold at least one entry".to_string(),
            }),
            ResourcePool::Heap { .. } => Ok(()),
            ResourcePool::Disk { path, .. } if path.as_os_str().is_empty() => {
                Err(ConfigError::MissingRequired {
                    field: "resource_pool.path".to_string(),
                })
            }
            ResourcePool::Disk { max_size_mb: 0, .. } => Err(ConfigError::InvalidValue {
                field: "resource_pool.max_size_mb".to_string(),
                value: "0".to_string(),
                reason: "max_size_mb must be greater than 0".to_string(),
            }),
            ResourcePool::Disk { max_size_mb, .. } if disk_map_size(*max_size_mb).is_none() => {
                Err(ConfigError::InvalidValue {
                    field: "resource_pool.max_size_mb".to_string(),
                    value: max_size_mb.to_string(),
                    reason: "map size in bytes overflows the address space".to_string(),
                })
            }
            ResourcePool::Disk { .. } => Ok(()),
        }
    }
}

/// Extra per-tier service settings passed alongside a `StoreConfig`.
#[derive(Debug, Clone)]
pub enum ServiceConfig {
    /// Override the lock stripe count.
    Concurrency(usize),
    /// Time source used for expiry decisions.
    TimeSource(Arc<dyn Clock>),
}

/// Pick the clock requested by the service configs, defaulting to the system clock.
///
/// The last `TimeSource` wins.
pub fn resolve_clock(service_configs: &[ServiceConfig]) -> Arc<dyn Clock> {
    service_configs
        .iter()
        .rev()
        .find_map(|service_config| match service_config {
            ServiceConfig::TimeSource(clock) => Some(Arc::clone(clock)),
            ServiceConfig::Concurrency(_) => None,
        })
        .unwrap_or_else(|| Arc::new(SystemClock))
}
