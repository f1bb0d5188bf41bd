//! Optimized storage layer using RocksDB

use crate::config::{CompressionType, StorageConfig};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct OptimizedStorage {
    db: Arc<DB>,
}

impl OptimizedStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, rocksdb::Error> {
        Self::open(path, &StorageConfig::default())
    }

    /// Open using the tuning knobs from `StorageConfig`
    pub fn new_with_config(config: &StorageConfig) -> Result<Self, rocksdb::Error> {
        Self::open(&config.data_directory, config)
    }

    fn open<P: AsRef<Path>>(path: P, config: &StorageConfig) -> Result<Self, rocksdb::Error> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        opts.set_max_write_buffer_number(config.max_write_buffer_number as i32);
        opts.set_compression_type(match config.compression_type {
            CompressionType::None => rocksdb::DBCompressionType::None,
            CompressionType::Snappy => rocksdb::DBCompressionType::Snappy,
            CompressionType::Lz4 => rocksdb::DBCompressionType::Lz4,
            CompressionType::Zstd => rocksdb::DBCompressionType::Zstd,
        });

        let db = DB::open(&opts, path)?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.db.get(key).ok().flatten()
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), rocksdb::Error> {
        self.db.put(key, value)
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), rocksdb::Error> {
        self.db.delete(key)
    }

    pub fn batch_write<K, V>(&self, items: &[(K, V)]) -> Result<(), rocksdb::Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut batch = WriteBatch::default();
        for (key, value) in items {
            batch.put(key, value);
        }
        self.db.write(batch)
    }

    /// All key/value pairs under `prefix`, in key order. Unreadable rows are skipped.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.db
            .iterator(IteratorMode::From(prefix, Direction::Forward))
            .filter_map(Result::ok)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.to_vec(), value.to_vec()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = OptimizedStorage::new(dir.path()).expect("open");

        storage.put(b"k1", b"v1").expect("put");
        assert_eq!(storage.get(b"k1"), Some(b"v1".to_vec()));

        storage.delete(b"k1").expect("delete");
        assert_eq!(storage.get(b"k1"), None);
    }

    #[test]
    fn test_scan_prefix_stops_at_boundary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = OptimizedStorage::new(dir.path()).expect("open");

        storage
            .batch_write(&[
                (b"game:a".to_vec(), b"1".to_vec()),
                (b"game:b".to_vec(), b"2".to_vec()),
                (b"other:c".to_vec(), b"3".to_vec()),
            ])
            .expect("batch");

        let rows = storage.scan_prefix(b"game:");
        let keys: Vec<_> = rows.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"game:a".to_vec(), b"game:b".to_vec()]);
    }
}
