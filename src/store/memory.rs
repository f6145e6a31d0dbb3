//! In-memory storage backend

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Store, StoreKey, StoreValue};
use crate::models::WebSubResult;

/// Map-backed store; clones share the same map
#[derive(Debug)]
pub struct MemoryStore<K, V> {
    entries: Arc<RwLock<BTreeMap<K, V>>>,
}

impl<K: StoreKey, V: StoreValue> MemoryStore<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<K: StoreKey, V: StoreValue> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for MemoryStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K: StoreKey, V: StoreValue> Store<K, V> for MemoryStore<K, V> {
    fn get(&self, key: &K) -> WebSubResult<Option<V>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: K, value: V) -> WebSubResult<()> {
        self.entries.write().insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &K) -> WebSubResult<Option<V>> {
        Ok(self.entries.write().remove(key))
    }

    fn update(
        &self,
        key: &K,
        f: &mut dyn FnMut(Option<V>) -> Option<V>,
    ) -> WebSubResult<Option<V>> {
        let mut entries = self.entries.write();
        let current = entries.get(key).cloned();
        match f(current) {
            Some(value) => {
                entries.insert(key.clone(), value.clone());
                Ok(Some(value))
            }
            None => {
                entries.remove(key);
                Ok(None)
            }
        }
    }

    fn scan_all(&self) -> WebSubResult<Vec<(K, V)>> {
        Ok(self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HubKey, HubSubscription};
    use chrono::{Duration, Utc};

    #[test]
    fn test_set_get_delete() {
        let store: MemoryStore<HubKey, HubSubscription> = MemoryStore::new();
        let key = HubKey::new("http://example.com", "http://cb.example.com/1");

        store.set(key.clone(), HubSubscription::with_lease(60, None)).unwrap();
        assert!(store.get(&key).unwrap().is_some());

        assert!(store.delete(&key).unwrap().is_some());
        assert!(store.get(&key).unwrap().is_none());
        // deleting again is benign
        assert!(store.delete(&key).unwrap().is_none());
    }

    #[test]
    fn test_update_and_scan() {
        let store: MemoryStore<HubKey, HubSubscription> = MemoryStore::new();
        let fresh = HubKey::new("http://example.com", "http://cb.example.com/fresh");
        let stale = HubKey::new("http://example.com", "http://cb.example.com/stale");

        store.set(fresh.clone(), HubSubscription::with_lease(600, None)).unwrap();
        store
            .set(
                stale.clone(),
                HubSubscription {
                    expiration_time: Utc::now() - Duration::seconds(1),
                    secret: None,
                },
            )
            .unwrap();

        let expiring = store.scan_expiring(Utc::now()).unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].0, stale);

        store
            .update(&fresh, &mut |current| {
                current.map(|mut sub| {
                    sub.secret = Some("s".to_string());
                    sub
                })
            })
            .unwrap();
        assert_eq!(store.get(&fresh).unwrap().unwrap().secret.as_deref(), Some("s"));

        store.update(&stale, &mut |_| None).unwrap();
        assert_eq!(store.scan_all().unwrap().len(), 1);
    }
}
