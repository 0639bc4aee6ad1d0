//! Stratum Storage - Engines, Tier and Provider
//!
//! Implements the lower caching tier contract from `stratum-core` on top
//! of pluggable storage engines. Heap pools use [`MemoryEngine`], disk
//! pools use the LMDB-backed [`LmdbEngine`].

pub mod lmdb;
pub mod memory;
pub mod provider;
mod striped;
pub mod tier;

pub use lmdb::LmdbEngine;
pub use memory::MemoryEngine;
pub use provider::StoreTierProvider;
pub use tier::StoreBackedTier;

// Re-export the contract so callers need a single import.
pub use stratum_core::{
    AccessError, ConfigurationChange, ConfigurationChangeListener, ConfigurationChangeSupport,
    ExpiryPolicy, InvalidationListener, LowerCachingTier, LowerCachingTierProvider, ResourcePool,
    ServiceConfig, StorageEngine, StoreConfig, StratumError, StratumResult, TierState,
    ValueHolder,
};
