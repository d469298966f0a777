//! # Cache Pools
//!
//! External cache pools used by the metadata loader.
//!
//! Pools provide last-write-wins semantics. No locking is performed beyond
//! what the backend itself guarantees (a mutex for `MemoryPool`, redb
//! transactions for `RedbPool`).

use crate::types::CharcoalError;
use redb::{Database, ReadableDatabase, TableDefinition};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

/// Table for cache entries: key string -> JSON bytes
const CACHE: TableDefinition<&str, &[u8]> = TableDefinition::new("cache");

// =============================================================================
// CACHE POOL TRAIT
// =============================================================================

/// A key/value cache of JSON documents.
pub trait CachePool: Send + Sync {
    /// Fetch an entry.
    fn get(&self, key: &str) -> Result<Option<Value>, CharcoalError>;

    /// Store an entry, replacing any previous one.
    fn set(&self, key: &str, value: &Value) -> Result<(), CharcoalError>;

    /// Remove one entry.
    fn delete(&self, key: &str) -> Result<(), CharcoalError>;

    /// Remove every entry.
    fn clear(&self) -> Result<(), CharcoalError>;
}

// =============================================================================
// NULL POOL
// =============================================================================

/// A pool that never stores anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPool;

impl CachePool for NullPool {
    fn get(&self, _key: &str) -> Result<Option<Value>, CharcoalError> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &Value) -> Result<(), CharcoalError> {
        Ok(())
    }

    fn delete(&self, _key: &str) -> Result<(), CharcoalError> {
        Ok(())
    }

    fn clear(&self) -> Result<(), CharcoalError> {
        Ok(())
    }
}

// =============================================================================
// MEMORY POOL
// =============================================================================

/// Process-local pool.
#[derive(Debug, Default)]
pub struct MemoryPool {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached entries.
    pub fn len(&self) -> Result<usize, CharcoalError> {
        Ok(self.lock()?.len())
    }

    /// Check whether the pool holds no entry.
    pub fn is_empty(&self) -> Result<bool, CharcoalError> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Value>>, CharcoalError> {
        self.entries
            .lock()
            .map_err(|e| CharcoalError::Io(format!("cache pool poisoned: {}", e)))
    }
}

impl CachePool for MemoryPool {
    fn get(&self, key: &str) -> Result<Option<Value>, CharcoalError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), CharcoalError> {
        self.lock()?.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CharcoalError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), CharcoalError> {
        self.lock()?.clear();
        Ok(())
    }
}

// =============================================================================
// REDB POOL
// =============================================================================

/// A persistent pool backed by a redb database file.
///
/// Survives process restarts, so metadata stays cached across CLI
/// invocations until explicitly cleared.
pub struct RedbPool {
    db: Database,
}

impl std::fmt::Debug for RedbPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbPool").finish_non_exhaustive()
    }
}

impl RedbPool {
    /// Open or create a cache database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CharcoalError> {
        let db = Database::create(path.as_ref()).map_err(|e| CharcoalError::Io(e.to_string()))?;

        // Initialize the table so readers never see it missing
        let write_txn = db
            .begin_write()
            .map_err(|e| CharcoalError::Io(e.to_string()))?;
        let _ = write_txn
            .open_table(CACHE)
            .map_err(|e| CharcoalError::Io(e.to_string()))?;
        write_txn
            .commit()
            .map_err(|e| CharcoalError::Io(e.to_string()))?;

        Ok(Self { db })
    }
}

impl CachePool for RedbPool {
    fn get(&self, key: &str) -> Result<Option<Value>, CharcoalError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| CharcoalError::Io(e.to_string()))?;
        let table = read_txn
            .open_table(CACHE)
            .map_err(|e| CharcoalError::Io(e.to_string()))?;
        let entry = table
            .get(key)
            .map_err(|e| CharcoalError::Io(e.to_string()))?;
        match entry {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), CharcoalError> {
        let bytes = serde_json::to_vec(value)?;
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| CharcoalError::Io(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(CACHE)
                .map_err(|e| CharcoalError::Io(e.to_string()))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(|e| CharcoalError::Io(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| CharcoalError::Io(e.to_string()))
    }

    fn delete(&self, key: &str) -> Result<(), CharcoalError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| CharcoalError::Io(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(CACHE)
                .map_err(|e| CharcoalError::Io(e.to_string()))?;
            table
                .remove(key)
                .map_err(|e| CharcoalError::Io(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| CharcoalError::Io(e.to_string()))
    }

    fn clear(&self) -> Result<(), CharcoalError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| CharcoalError::Io(e.to_string()))?;
        write_txn
            .delete_table(CACHE)
            .map_err(|e| CharcoalError::Io(e.to_string()))?;
        let _ = write_txn
            .open_table(CACHE)
            .map_err(|e| CharcoalError::Io(e.to_string()))?;
        write_txn
            .commit()
            .map_err(|e| CharcoalError::Io(e.to_string()))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn exercise(pool: &dyn CachePool) {
        assert_eq!(pool.get("a").unwrap(), None);
        pool.set("a", &json!({"x": 1})).unwrap();
        pool.set("b", &json!([1, 2])).unwrap();
        assert_eq!(pool.get("a").unwrap(), Some(json!({"x": 1})));

        pool.set("a", &json!("replaced")).unwrap();
        assert_eq!(pool.get("a").unwrap(), Some(json!("replaced")));

        pool.delete("a").unwrap();
        assert_eq!(pool.get("a").unwrap(), None);
        assert_eq!(pool.get("b").unwrap(), Some(json!([1, 2])));

        pool.clear().unwrap();
        assert_eq!(pool.get("b").unwrap(), None);
    }

    #[test]
    fn memory_pool_operations() {
        let pool = MemoryPool::new();
        exercise(&pool);
        assert!(pool.is_empty().unwrap());
    }

    #[test]
    fn redb_pool_operations() {
        let temp = tempdir().expect("temp dir");
        let pool = RedbPool::open(temp.path().join("cache.redb")).expect("open");
        exercise(&pool);
    }

    #[test]
    fn redb_pool_persists_after_reopen() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("cache.redb");
        {
            let pool = RedbPool::open(&path).expect("open");
            pool.set("metadata/foo", &json!({"properties": {}})).unwrap();
        }
        let pool = RedbPool::open(&path).expect("reopen");
        assert_eq!(
            pool.get("metadata/foo").unwrap(),
            Some(json!({"properties": {}}))
        );
    }

    #[test]
    fn null_pool_never_stores() {
        let pool = NullPool;
        pool.set("a", &json!(1)).unwrap();
        assert_eq!(pool.get("a").unwrap(), None);
    }
}
