//! In-process heap engine.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use stratum_core::{StorageEngine, StorageError, ValueHolder};

/// Heap storage backed by a `HashMap`, optionally bounded by entry count.
///
/// Holders are stored as shared `Arc`s, so a holder read from the engine is
/// the same object that was put. A full engine rejects new keys with
/// `StorageError::ResourceExhausted`; replacing an existing key always
/// succeeds. Shrinking the capacity below the current size keeps every
/// mapping and only blocks new keys.
pub struct MemoryEngine<K, V> {
    entries: RwLock<HashMap<K, Arc<ValueHolder<V>>>>,
    capacity: RwLock<Option<u64>>,
    open: AtomicBool,
}

impl<K, V> MemoryEngine<K, V> {
    /// Create an unbounded engine.
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Create an engine holding at most `capacity` mappings.
    pub fn with_capacity(capacity: Option<u64>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: RwLock::new(capacity),
            open: AtomicBool::new(false),
        }
    }

    /// Current entry bound.
    pub fn capacity(&self) -> Option<u64> {
        *self.capacity.read()
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StorageError::Closed)
        }
    }
}

impl<K, V> Default for MemoryEngine<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> StorageEngine<K, V> for MemoryEngine<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Send + Sync,
{
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(&self) -> Result<(), StorageError> {
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        self.open.store(false, Ordering::Release);
        self.entries.write().clear();
        Ok(())
    }

    fn get(&self, key: &K) -> Result<Option<Arc<ValueHolder<V>>>, StorageError> {
        self.check_open()?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &K, holder: Arc<ValueHolder<V>>) -> Result<(), StorageError> {
        self.check_open()?;
        let mut entries = self.entries.write();
        if !entries.contains_key(key) {
            if let Some(capacity) = *self.capacity.read() {
                if entries.len() as u64 >= capacity {
                    return Err(StorageError::ResourceExhausted {
                        reason: format!("heap pool is full ({capacity} entries)"),
                    });
                }
            }
        }
        entries.insert(key.clone(), holder);
        Ok(())
    }

    fn remove(&self, key: &K) -> Result<Option<Arc<ValueHolder<V>>>, StorageError> {
        self.check_open()?;
        Ok(self.entries.write().remove(key))
    }

    fn keys(&self) -> Result<Vec<K>, StorageError> {
        self.check_open()?;
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn clear(&self) -> Result<u64, StorageError> {
        self.check_open()?;
        let mut entries = self.entries.write();
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }

    fn len(&self) -> Result<u64, StorageError> {
        self.check_open()?;
        Ok(self.entries.read().len() as u64)
    }

    fn resize(&self, capacity: Option<u64>) -> Result<(), StorageError> {
        *self.capacity.write() = capacity;
        Ok(())
    }
}
