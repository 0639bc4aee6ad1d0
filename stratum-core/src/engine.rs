//! Storage engine contract.
//!
//! A tier treats its backing store as a black box supporting
//! get/put/remove/iterate-all. Engines own physical layout, serialization
//! and capacity accounting; they provide no cross-operation atomicity,
//! which is the tier's job.

use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::StorageError;
use crate::holder::ValueHolder;

/// Bounds a key type must satisfy to be stored in any engine.
pub trait CacheKey:
    Eq + Hash + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> CacheKey for T where
    T: Eq + Hash + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Bounds a value type must satisfy to be stored in any engine.
pub trait CacheValue: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Backing store for a single tier.
///
/// Implementations must be thread-safe; each individual call is atomic on
/// its own but callers coordinate compound sequences.
pub trait StorageEngine<K, V>: Send + Sync {
    /// Short engine name for logs and error messages.
    fn name(&self) -> &'static str;

    /// Acquire storage handles. Called once before any other operation.
    fn open(&self) -> Result<(), StorageError>;

    /// Release storage handles. Subsequent calls fail with `StorageError::Closed`.
    fn close(&self) -> Result<(), StorageError>;

    /// Read the holder mapped to `key`.
    fn get(&self, key: &K) -> Result<Option<Arc<ValueHolder<V>>>, StorageError>;

    /// Store `holder` under `key`, replacing any previous mapping.
    fn put(&self, key: &K, holder: Arc<ValueHolder<V>>) -> Result<(), StorageError>;

    /// Remove the mapping for `key`, returning what was stored.
    fn remove(&self, key: &K) -> Result<Option<Arc<ValueHolder<V>>>, StorageError>;

    /// Snapshot of every key currently stored.
    fn keys(&self) -> Result<Vec<K>, StorageError>;

    /// Remove every mapping, returning how many were removed.
    fn clear(&self) -> Result<u64, StorageError>;

    /// Number of stored mappings.
    fn len(&self) -> Result<u64, StorageError>;

    /// Whether the engine holds no mappings.
    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    /// Change the entry capacity. `None` removes the bound.
    fn resize(&self, _capacity: Option<u64>) -> Result<(), StorageError> {
        Err(StorageError::Unsupported {
            engine: self.name().to_string(),
            operation: "resize".to_string(),
        })
    }
}
