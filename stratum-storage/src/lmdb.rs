//! LMDB-backed engine.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep a tier's mappings in
//! a memory-mapped key-value store that survives process restarts.
//!
//! # Record Layout
//!
//! ```text
//! key:   serde_json(K)
//! value: [created_at millis: i64 LE][expires_at millis or i64::MIN: i64 LE][serde_json(V)]
//! ```
//!
//! The last-access stamp is not persisted; a holder read back from disk
//! reports its creation time as last access.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The engine uses:
//! - Read transactions for `get`, `keys` and `len`
//! - Write transactions for `put`, `remove` and `clear`
//!
//! Handles are created by `open` and dropped by `close`.

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, MdbError};
use parking_lot::RwLock;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stratum_core::{
    disk_map_size, timestamp_from_millis, CacheKey, CacheValue, StorageEngine, StorageError,
    ValueHolder,
};

const HEADER_LEN: usize = 16;
const NO_DEADLINE: i64 = i64::MIN;

struct LmdbHandles {
    env: Env,
    db: Database<Bytes, Bytes>,
}

/// Disk storage in an LMDB environment under a directory.
pub struct LmdbEngine<K, V> {
    path: PathBuf,
    max_size_mb: usize,
    handles: RwLock<Option<LmdbHandles>>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> LmdbEngine<K, V> {
    /// Describe an engine at `path` with a map size of `max_size_mb`.
    ///
    /// Nothing touches the filesystem until `open`.
    pub fn new(path: impl Into<PathBuf>, max_size_mb: usize) -> Self {
        Self {
            path: path.into(),
            max_size_mb,
            handles: RwLock::new(None),
            _marker: PhantomData,
        }
    }

    /// Directory holding the LMDB files.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether handles are currently open.
    pub fn is_open(&self) -> bool {
        self.handles.read().is_some()
    }

    fn with_handles<T>(
        &self,
        f: impl FnOnce(&LmdbHandles) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let handles = self.handles.read();
        match handles.as_ref() {
            Some(handles) => f(handles),
            None => Err(StorageError::Closed),
        }
    }
}

fn map_heed(e: heed::Error) -> StorageError {
    match e {
        heed::Error::Mdb(MdbError::MapFull) => StorageError::ResourceExhausted {
            reason: format!("LMDB map is full: {}", MdbError::MapFull),
        },
        heed::Error::Io(io) => StorageError::from(io),
        other => StorageError::TransactionFailed {
            reason: other.to_string(),
        },
    }
}

fn encode_key<K: CacheKey>(key: &K) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(key).map_err(|e| StorageError::SerializationFailed {
        reason: e.to_string(),
    })
}

fn decode_key<K: CacheKey>(bytes: &[u8]) -> Result<K, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::CorruptRecord {
        reason: format!("undecodable key: {e}"),
    })
}

fn encode_record<V: CacheValue>(holder: &ValueHolder<V>) -> Result<Vec<u8>, StorageError> {
    let value_bytes =
        serde_json::to_vec(holder.value()).map_err(|e| StorageError::SerializationFailed {
            reason: e.to_string(),
        })?;
    let expires_at = holder
        .expires_at()
        .map(|t| t.timestamp_millis())
        .unwrap_or(NO_DEADLINE);

    let mut record = Vec::with_capacity(HEADER_LEN + value_bytes.len());
    record.extend_from_slice(&holder.created_at().timestamp_millis().to_le_bytes());
    record.extend_from_slice(&expires_at.to_le_bytes());
    record.extend_from_slice(&value_bytes);
    Ok(record)
}

fn decode_record<V: CacheValue>(bytes: &[u8]) -> Result<ValueHolder<V>, StorageError> {
    if bytes.len() < HEADER_LEN {
        return Err(StorageError::CorruptRecord {
            reason: format!("record is {} bytes, header needs {HEADER_LEN}", bytes.len()),
        });
    }

    let read_i64 = |range: std::ops::Range<usize>| -> Result<i64, StorageError> {
        let raw: [u8; 8] = bytes[range]
            .try_into()
            .map_err(|_| StorageError::CorruptRecord {
                reason: "invalid timestamp".to_string(),
            })?;
        Ok(i64::from_le_bytes(raw))
    };

    let created_at = timestamp_from_millis(read_i64(0..8)?);
    let expires_at = match read_i64(8..16)? {
        NO_DEADLINE => None,
        millis => Some(timestamp_from_millis(millis)),
    };
    let value: V =
        serde_json::from_slice(&bytes[HEADER_LEN..]).map_err(|e| StorageError::CorruptRecord {
            reason: format!("undecodable value: {e}"),
        })?;

    Ok(ValueHolder::with_expiry(value, created_at, expires_at))
}

impl<K: CacheKey, V: CacheValue> StorageEngine<K, V> for LmdbEngine<K, V> {
    fn name(&self) -> &'static str {
        "lmdb"
    }

    fn open(&self) -> Result<(), StorageError> {
        let mut handles = self.handles.write();
        if handles.is_some() {
            return Ok(());
        }

        let map_size =
            disk_map_size(self.max_size_mb).ok_or_else(|| StorageError::ResourceExhausted {
                reason: format!("map size of {} MB does not fit in memory", self.max_size_mb),
            })?;
        std::fs::create_dir_all(&self.path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(&self.path)
        }
        .map_err(map_heed)?;

        let mut wtxn = env.write_txn().map_err(map_heed)?;
        let db: Database<Bytes, Bytes> = env.create_database(&mut wtxn, None).map_err(map_heed)?;
        wtxn.commit().map_err(map_heed)?;

        *handles = Some(LmdbHandles { env, db });
        tracing::debug!(path = %self.path.display(), max_size_mb = self.max_size_mb, "Opened LMDB environment");
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        if self.handles.write().take().is_some() {
            tracing::debug!(path = %self.path.display(), "Closed LMDB environment");
        }
        Ok(())
    }

    fn get(&self, key: &K) -> Result<Option<Arc<ValueHolder<V>>>, StorageError> {
        let encoded_key = encode_key(key)?;
        self.with_handles(|h| {
            let rtxn = h.env.read_txn().map_err(map_heed)?;
            match h.db.get(&rtxn, &encoded_key).map_err(map_heed)? {
                Some(bytes) => Ok(Some(Arc::new(decode_record(bytes)?))),
                None => Ok(None),
            }
        })
    }

    fn put(&self, key: &K, holder: Arc<ValueHolder<V>>) -> Result<(), StorageError> {
        let encoded_key = encode_key(key)?;
        let record = encode_record(&holder)?;
        self.with_handles(|h| {
            let mut wtxn = h.env.write_txn().map_err(map_heed)?;
            h.db.put(&mut wtxn, &encoded_key, &record).map_err(map_heed)?;
            wtxn.commit().map_err(map_heed)
        })
    }

    fn remove(&self, key: &K) -> Result<Option<Arc<ValueHolder<V>>>, StorageError> {
        let encoded_key = encode_key(key)?;
        self.with_handles(|h| {
            let mut wtxn = h.env.write_txn().map_err(map_heed)?;
            let previous = match h.db.get(&wtxn, &encoded_key).map_err(map_heed)? {
                Some(bytes) => Some(decode_record::<V>(bytes)),
                None => None,
            };
            if previous.is_none() {
                return Ok(None);
            }
            h.db.delete(&mut wtxn, &encoded_key).map_err(map_heed)?;
            wtxn.commit().map_err(map_heed)?;
            // A corrupt record is still removed; the caller sees the decode error.
            previous.transpose().map(|holder| holder.map(Arc::new))
        })
    }

    fn keys(&self) -> Result<Vec<K>, StorageError> {
        self.with_handles(|h| {
            let rtxn = h.env.read_txn().map_err(map_heed)?;
            let mut keys = Vec::new();
            for entry in h.db.iter(&rtxn).map_err(map_heed)? {
                let (key, _) = entry.map_err(map_heed)?;
                keys.push(decode_key(key)?);
            }
            Ok(keys)
        })
    }

    fn clear(&self) -> Result<u64, StorageError> {
        self.with_handles(|h| {
            let mut wtxn = h.env.write_txn().map_err(map_heed)?;
            let removed = h.db.len(&wtxn).map_err(map_heed)?;
            h.db.clear(&mut wtxn).map_err(map_heed)?;
            wtxn.commit().map_err(map_heed)?;
            Ok(removed)
        })
    }

    fn len(&self) -> Result<u64, StorageError> {
        self.with_handles(|h| {
            let rtxn = h.env.read_txn().map_err(map_heed)?;
            h.db.len(&rtxn).map_err(map_heed)
        })
    }
}
