//! RocksDB-backed storage.
//!
//! Column families:
//! - `entries` — persisted subtrees, keyed by `prefix + logical key` (UTF-8),
//!   valued by LZ4-compressed JSON.
//!
//! Writes go straight to RocksDB's memtable; durability across a crash is
//! RocksDB's own WAL. `sync_writes` forces an fsync per write.

use rocksdb::{
    ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode, IteratorMode, Options,
    SingleThreaded, WriteOptions,
};
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::{Storage, StorageFuture};
use crate::error::StorageError;

const CF_ENTRIES: &str = "entries";

/// Where and how the entries database is opened.
///
/// The workload is point reads and small overwrites per top-level key, so
/// the only tuning knob is the block cache behind point lookups.
#[derive(Debug, Clone)]
pub struct RocksConfig {
    pub path: PathBuf,
    /// Point-lookup block cache, in MiB.
    pub lookup_cache_mb: u64,
    /// fsync each `set_item`/`remove_item` before it resolves.
    pub sync_writes: bool,
}

impl Default for RocksConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("logos_persist"),
            lookup_cache_mb: 32,
            sync_writes: false,
        }
    }
}

impl RocksConfig {
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lookup_cache_mb: 1,
            ..Self::default()
        }
    }
}

/// Persistent [`Storage`] on RocksDB.
pub struct RocksStorage {
    db: DBWithThreadMode<SingleThreaded>,
    config: RocksConfig,
}

impl RocksStorage {
    /// Open (or create) the database at the configured path.
    pub fn open(config: RocksConfig) -> Result<Self, StorageError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_keep_log_file_num(5);

        let mut cf_opts = Options::default();
        cf_opts.optimize_for_point_lookup(config.lookup_cache_mb);
        // Values are already LZ4 compressed.
        cf_opts.set_compression_type(DBCompressionType::None);

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            vec![ColumnFamilyDescriptor::new(CF_ENTRIES, cf_opts)],
        )?;

        log::debug!("Opened RocksDB storage at {}", config.path.display());
        Ok(Self { db, config })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(CF_ENTRIES)
            .ok_or_else(|| StorageError::Backend(format!("Column family '{CF_ENTRIES}' not found")))
    }

    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }

    fn encode(value: &Value) -> Result<Vec<u8>, StorageError> {
        let bytes = serde_json::to_vec(value).map_err(|e| StorageError::Codec(e.to_string()))?;
        Ok(lz4_flex::compress_prepend_size(&bytes))
    }

    fn decode(bytes: &[u8]) -> Result<Value, StorageError> {
        let raw = lz4_flex::decompress_size_prepended(bytes)
            .map_err(|e| StorageError::Codec(e.to_string()))?;
        serde_json::from_slice(&raw).map_err(|e| StorageError::Codec(e.to_string()))
    }

    fn get_blocking(&self, key: &str) -> Result<Option<Value>, StorageError> {
        match self.db.get_cf(self.cf()?, key.as_bytes())? {
            Some(bytes) => Self::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn set_blocking(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let encoded = Self::encode(value)?;
        self.db
            .put_cf_opt(self.cf()?, key.as_bytes(), encoded, &self.write_opts())?;
        Ok(())
    }

    fn remove_blocking(&self, key: &str) -> Result<(), StorageError> {
        self.db
            .delete_cf_opt(self.cf()?, key.as_bytes(), &self.write_opts())?;
        Ok(())
    }

    fn keys_blocking(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for item in self.db.iterator_cf(self.cf()?, IteratorMode::Start) {
            let (key, _) = item?;
            let key = String::from_utf8(key.into_vec())
                .map_err(|e| StorageError::Codec(format!("non UTF-8 key: {e}")))?;
            keys.push(key);
        }
        Ok(keys)
    }
}

impl Storage for RocksStorage {
    fn get_item<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<Value>> {
        Box::pin(async move { self.get_blocking(key) })
    }

    fn set_item<'a>(&'a self, key: &'a str, value: Value) -> StorageFuture<'a, ()> {
        Box::pin(async move { self.set_blocking(key, &value) })
    }

    fn remove_item<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move { self.remove_blocking(key) })
    }

    fn get_all_keys(&self) -> StorageFuture<'_, Vec<String>> {
        Box::pin(async move { self.keys_blocking() })
    }
}
