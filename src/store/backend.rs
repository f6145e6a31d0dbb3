//! Storage capability shared by every backend

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::{HubKey, HubSubscription, SubscriberSubscription, WebSubError, WebSubResult};

/// Values that carry an absolute expiration time
pub trait Expiring {
    fn expiration_time(&self) -> DateTime<Utc>;
}

impl Expiring for SubscriberSubscription {
    fn expiration_time(&self) -> DateTime<Utc> {
        self.expiration_time
    }
}

impl Expiring for HubSubscription {
    fn expiration_time(&self) -> DateTime<Utc> {
        self.expiration_time
    }
}

/// Keys that can be laid out as bytes for ordered backends
pub trait StoreKey: Clone + Ord + Send + Sync + 'static {
    fn to_bytes(&self) -> Vec<u8>;
    fn from_bytes(bytes: &[u8]) -> WebSubResult<Self>;
}

impl StoreKey for String {
    fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> WebSubResult<Self> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| WebSubError::Database(format!("Invalid key: {}", e)))
    }
}

// URLs never contain a NUL byte, so it separates topic and callback
impl StoreKey for HubKey {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.topic_url.len() + self.callback_url.len() + 1);
        bytes.extend_from_slice(self.topic_url.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(self.callback_url.as_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> WebSubResult<Self> {
        let split = bytes
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| WebSubError::Database("Malformed hub key".to_string()))?;
        let topic = String::from_bytes(&bytes[..split])?;
        let callback = String::from_bytes(&bytes[split + 1..])?;
        Ok(HubKey::new(topic, callback))
    }
}

/// Marker for storable values
pub trait StoreValue: Expiring + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> StoreValue for T where T: Expiring + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Keyed durable storage.
///
/// Implementations must be safe to call from many workers at once, and
/// [`Store::update`] must be atomic with respect to other writers of the
/// same key.
pub trait Store<K: StoreKey, V: StoreValue>: Send + Sync {
    fn get(&self, key: &K) -> WebSubResult<Option<V>>;

    fn set(&self, key: K, value: V) -> WebSubResult<()>;

    /// Remove and return the value. A missing key is not an error.
    fn delete(&self, key: &K) -> WebSubResult<Option<V>>;

    /// Atomic read-modify-write. `f` sees the current value and returns the
    /// new one; `None` deletes the key.
    fn update(
        &self,
        key: &K,
        f: &mut dyn FnMut(Option<V>) -> Option<V>,
    ) -> WebSubResult<Option<V>>;

    /// Entries whose expiration time is at or before `before`
    fn scan_expiring(&self, before: DateTime<Utc>) -> WebSubResult<Vec<(K, V)>> {
        Ok(self
            .scan_all()?
            .into_iter()
            .filter(|(_, v)| v.expiration_time() <= before)
            .collect())
    }

    fn scan_all(&self) -> WebSubResult<Vec<(K, V)>>;
}

/// Subscriber-side store, keyed by callback id
pub type SubscriberStore = dyn Store<String, SubscriberSubscription>;

/// Hub-side store, keyed by (topic_url, callback_url)
pub type HubStore = dyn Store<HubKey, HubSubscription>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_key_bytes() {
        let key = HubKey::new("http://example.com/feed", "https://sub.example.com/cb/1");
        let restored = HubKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(restored, key);
    }

    #[test]
    fn test_hub_key_malformed() {
        assert!(HubKey::from_bytes(b"no-separator").is_err());
    }
}
