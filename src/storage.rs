//! Storage layer using a RocksDB `TransactionDB`
//!
//! Row locks taken with `get_for_update` give the session store its
//! compare-and-swap: two writers on the same key are serialized by RocksDB,
//! and the second one reads the first one's committed value.

use crate::config::StorageConfig;
use crate::errors::{StakeResult, StorageError};
use rocksdb::{Direction, IteratorMode, Options, Transaction, TransactionDB, TransactionDBOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct OptimizedStorage {
    db: Arc<TransactionDB>,
}

impl OptimizedStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, rocksdb::Error> {
        Self::open(path, StorageConfig::default().lock_timeout_ms)
    }

    pub fn new_with_config(config: &StorageConfig) -> StakeResult<Self> {
        if config.clear_on_start {
            warn!(path = %config.data_directory, "Testing mode: clearing session database");
            let _ = std::fs::remove_dir_all(&config.data_directory);
        }

        let storage = Self::open(&config.data_directory, config.lock_timeout_ms)
            .map_err(|e| StorageError::DatabaseOpenFailed(format!("{}: {}", config.data_directory, e)))?;
        info!(path = %config.data_directory, "Session database opened");
        Ok(storage)
    }

    fn open<P: AsRef<Path>>(path: P, lock_timeout_ms: u64) -> Result<Self, rocksdb::Error> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(lock_timeout_ms as i64);

        let db: TransactionDB = TransactionDB::open(&opts, &txn_opts, path)?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, rocksdb::Error> {
        self.db.get(key)
    }

    /// Up to `limit` entries whose key starts with `prefix`, in key order
    pub fn scan_prefix(&self, prefix: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>, rocksdb::Error> {
        let mut rows = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item?;
            if !key.starts_with(prefix) || rows.len() >= limit {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }

    /// Start a pessimistic transaction. Dropping it without `commit` rolls back.
    pub fn transaction(&self) -> Transaction<'_, TransactionDB> {
        self.db.transaction()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_prefix_stops_at_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let storage = OptimizedStorage::new(dir.path()).unwrap();

        let txn = storage.transaction();
        txn.put(b"a:1", b"x").unwrap();
        txn.put(b"a:2", b"y").unwrap();
        txn.put(b"b:1", b"z").unwrap();
        txn.commit().unwrap();

        let rows = storage.scan_prefix(b"a:", 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].1, b"y".to_vec());

        let limited = storage.scan_prefix(b"a:", 1).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_uncommitted_transaction_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let storage = OptimizedStorage::new(dir.path()).unwrap();

        {
            let txn = storage.transaction();
            txn.put(b"k", b"v").unwrap();
        }

        assert_eq!(storage.get(b"k").unwrap(), None);
    }
}
