//! RocksDB storage backend

use parking_lot::Mutex;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use super::{Store, StoreKey, StoreValue};
use crate::models::{WebSubError, WebSubResult};

/// Column family holding subscriber-side records
pub const SUBSCRIBER_CF: &str = "subscriber";
/// Column family holding hub-side records
pub const HUB_CF: &str = "hub";

const COLUMN_FAMILIES: [&str; 2] = [SUBSCRIBER_CF, HUB_CF];

/// RocksDB database shared by the typed column-family stores
pub struct RocksStore {
    db: Arc<rocksdb::DB>,
    // Serializes read-modify-write cycles across every column family
    write_lock: Arc<Mutex<()>>,
}

impl RocksStore {
    /// Open or create a RocksDB database
    pub fn open<P: AsRef<Path>>(path: P) -> WebSubResult<Self> {
        Self::open_with_opts(path, 64, true)
    }

    /// Open with custom options
    pub fn open_with_opts<P: AsRef<Path>>(
        path: P,
        cache_size_mb: usize,
        compression: bool,
    ) -> WebSubResult<Self> {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_block_cache(&rocksdb::Cache::new_lru_cache(cache_size_mb * 1024 * 1024));
        opts.set_block_based_table_factory(&block_opts);

        if compression {
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        }

        let db = rocksdb::DB::open_cf(&opts, path, COLUMN_FAMILIES)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Typed view over one column family
    pub fn column<K: StoreKey, V: StoreValue>(&self, name: &'static str) -> RocksColumn<K, V> {
        RocksColumn {
            rocks: self.clone(),
            name,
            _marker: PhantomData,
        }
    }

    fn cf(&self, name: &str) -> WebSubResult<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| WebSubError::Database(format!("Column family not found: {}", name)))
    }
}

impl Clone for RocksStore {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            write_lock: Arc::clone(&self.write_lock),
        }
    }
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore").finish()
    }
}

/// Store backed by a single RocksDB column family
pub struct RocksColumn<K, V> {
    rocks: RocksStore,
    name: &'static str,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: StoreKey, V: StoreValue> RocksColumn<K, V> {
    fn read(&self, key: &K) -> WebSubResult<Option<V>> {
        let cf = self.rocks.cf(self.name)?;
        match self.rocks.db.get_cf(cf, key.to_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn write(&self, key: &K, value: &V) -> WebSubResult<()> {
        let cf = self.rocks.cf(self.name)?;
        let value = serde_json::to_vec(value)?;
        self.rocks.db.put_cf(cf, key.to_bytes(), value)?;
        Ok(())
    }

    fn remove(&self, key: &K) -> WebSubResult<()> {
        let cf = self.rocks.cf(self.name)?;
        self.rocks.db.delete_cf(cf, key.to_bytes())?;
        Ok(())
    }
}

impl<K: StoreKey, V: StoreValue> Store<K, V> for RocksColumn<K, V> {
    fn get(&self, key: &K) -> WebSubResult<Option<V>> {
        self.read(key)
    }

    fn set(&self, key: K, value: V) -> WebSubResult<()> {
        let _guard = self.rocks.write_lock.lock();
        self.write(&key, &value)
    }

    fn delete(&self, key: &K) -> WebSubResult<Option<V>> {
        let _guard = self.rocks.write_lock.lock();
        let current = self.read(key)?;
        if current.is_some() {
            self.remove(key)?;
        }
        Ok(current)
    }

    fn update(
        &self,
        key: &K,
        f: &mut dyn FnMut(Option<V>) -> Option<V>,
    ) -> WebSubResult<Option<V>> {
        let _guard = self.rocks.write_lock.lock();
        let current = self.read(key)?;
        match f(current) {
            Some(value) => {
                self.write(key, &value)?;
                Ok(Some(value))
            }
            None => {
                self.remove(key)?;
                Ok(None)
            }
        }
    }

    fn scan_all(&self) -> WebSubResult<Vec<(K, V)>> {
        let cf = self.rocks.cf(self.name)?;
        let iter = self.rocks.db.iterator_cf(cf, rocksdb::IteratorMode::Start);

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            entries.push((K::from_bytes(&key)?, serde_json::from_slice(&value)?));
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HubKey, HubSubscription, SubscriberSubscription};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    #[test]
    fn test_open_database() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksStore::open(temp_dir.path()).unwrap();

        assert!(store.cf(SUBSCRIBER_CF).is_ok());
        assert!(store.cf(HUB_CF).is_ok());
        assert!(store.cf("missing").is_err());
    }

    #[test]
    fn test_hub_column_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let rocks = RocksStore::open(temp_dir.path()).unwrap();
        let hub: RocksColumn<HubKey, HubSubscription> = rocks.column(HUB_CF);

        let key = HubKey::new("http://example.com/feed", "http://cb.example.com/1");
        hub.set(key.clone(), HubSubscription::with_lease(60, Some("s".to_string())))
            .unwrap();

        let stored = hub.get(&key).unwrap().unwrap();
        assert_eq!(stored.secret.as_deref(), Some("s"));

        let all = hub.scan_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, key);

        assert!(hub.delete(&key).unwrap().is_some());
        assert!(hub.delete(&key).unwrap().is_none());
    }

    #[test]
    fn test_subscriber_column_update() {
        let temp_dir = TempDir::new().unwrap();
        let rocks = RocksStore::open(temp_dir.path()).unwrap();
        let subs: RocksColumn<String, SubscriberSubscription> = rocks.column(SUBSCRIBER_CF);

        let id = "callback-1".to_string();
        subs.set(
            id.clone(),
            SubscriberSubscription::requested("http://t", "https://h", None, None, 600),
        )
        .unwrap();

        subs.update(&id, &mut |current| {
            current.map(|mut sub| {
                sub.active = true;
                sub.pending = None;
                sub.expiration_time = Utc::now() + Duration::seconds(100);
                sub
            })
        })
        .unwrap();

        let stored = subs.get(&id).unwrap().unwrap();
        assert!(stored.active);
        assert!(subs.scan_expiring(Utc::now()).unwrap().is_empty());
    }
}
