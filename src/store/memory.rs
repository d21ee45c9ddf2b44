//! In-memory storage for one database of one shard

use super::entry::Entry;
use super::value::Value;
use bytes::Bytes;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use siphasher::sip::SipHasher13;

/// Type alias for our hash map with SipHasher
type StoreMap = HashMap<Bytes, Entry, BuildHasherDefault<SipHasher13>>;

/// Key-value map for a single (shard, database) pair.
///
/// Expired entries are removed lazily on access. The store never reads the
/// system clock; its owner keeps `now_ms` current.
pub struct MemoryStore {
    store: StoreMap,

    /// Cached wall clock in unix milliseconds
    now_ms: u64,

    /// Keys removed because they were found expired
    expired_keys: u64,
}

impl MemoryStore {
    /// Create a new memory store with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new memory store with specified initial capacity
    pub fn with_capacity(capacity: usize) -> Self {
        MemoryStore {
            store: HashMap::with_capacity_and_hasher(
                capacity,
                BuildHasherDefault::<SipHasher13>::default(),
            ),
            now_ms: 0,
            expired_keys: 0,
        }
    }

    pub fn set_time(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Drop the entry if it is expired; returns whether a live entry remains
    fn evict_if_expired(&mut self, key: &Bytes) -> bool {
        let expired = match self.store.get(key) {
            Some(entry) => entry.is_expired(self.now_ms),
            None => return false,
        };

        if expired {
            self.store.remove(key);
            self.expired_keys += 1;
            return false;
        }
        true
    }

    /// Set a key-value pair, clearing any expiry. Returns true if the key is new.
    pub fn set(&mut self, key: impl Into<Bytes>, value: Value) -> bool {
        let key = key.into();
        let is_new = !self.evict_if_expired(&key);
        self.store.insert(key, Entry::new(value));
        is_new
    }

    /// Set a key with an absolute expiry
    pub fn set_with_expiry(&mut self, key: impl Into<Bytes>, value: Value, expire_at_ms: u64) {
        self.store
            .insert(key.into(), Entry::with_expiry(value, expire_at_ms));
    }

    /// Get a value by key, returns None if not found or expired
    pub fn get(&mut self, key: &Bytes) -> Option<&Value> {
        if !self.evict_if_expired(key) {
            return None;
        }
        self.store.get(key).map(|entry| &entry.value)
    }

    /// Get a mutable reference to a value by key
    pub fn get_mut(&mut self, key: &Bytes) -> Option<&mut Value> {
        if !self.evict_if_expired(key) {
            return None;
        }
        self.store.get_mut(key).map(|entry| &mut entry.value)
    }

    /// Delete a key, returns true if a live key existed
    pub fn delete(&mut self, key: &Bytes) -> bool {
        if !self.evict_if_expired(key) {
            return false;
        }
        self.store.remove(key).is_some()
    }

    /// Check if a key exists (and is not expired)
    pub fn exists(&mut self, key: &Bytes) -> bool {
        self.evict_if_expired(key)
    }

    /// Set an absolute expiry on a live key
    pub fn expire_at(&mut self, key: &Bytes, expire_at_ms: u64) -> bool {
        if !self.evict_if_expired(key) {
            return false;
        }
        match self.store.get_mut(key) {
            Some(entry) => {
                entry.expire_at_ms = Some(expire_at_ms);
                true
            }
            None => false,
        }
    }

    /// Remove the expiry of a key; returns true if an expiry was removed
    pub fn persist(&mut self, key: &Bytes) -> bool {
        if !self.evict_if_expired(key) {
            return false;
        }
        match self.store.get_mut(key) {
            Some(entry) => entry.expire_at_ms.take().is_some(),
            None => false,
        }
    }

    /// Remaining TTL in milliseconds: -2 if missing, -1 if no expiry
    pub fn ttl_ms(&mut self, key: &Bytes) -> i64 {
        if !self.evict_if_expired(key) {
            return -2;
        }
        match self.store.get(key) {
            Some(entry) => entry.ttl_ms(self.now_ms),
            None => -2,
        }
    }

    /// Snapshot of the raw entry, live or not
    pub fn entry(&self, key: &Bytes) -> Option<Entry> {
        self.store.get(key).cloned()
    }

    /// Put back a previously captured entry (or remove the key if there was none)
    pub fn restore(&mut self, key: Bytes, entry: Option<Entry>) {
        match entry {
            Some(entry) => {
                self.store.insert(key, entry);
            }
            None => {
                self.store.remove(&key);
            }
        }
    }

    /// Remove all keys
    pub fn clear(&mut self) {
        self.store.clear();
    }

    /// Number of stored keys, including not yet evicted expired ones
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Get statistics about the store
    pub fn stats(&self) -> StoreStats {
        let active_keys = self
            .store
            .values()
            .filter(|entry| !entry.is_expired(self.now_ms))
            .count();

        StoreStats {
            total_keys: self.store.len(),
            active_keys,
            expired_keys: self.expired_keys,
            used_memory_bytes: self
                .store
                .iter()
                .map(|(k, entry)| k.len() + entry.memory_usage())
                .sum(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about a memory store
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total_keys: usize,
    pub active_keys: usize,
    pub expired_keys: u64,
    pub used_memory_bytes: usize,
}

impl StoreStats {
    pub fn merge(&mut self, other: &StoreStats) {
        self.total_keys += other.total_keys;
        self.active_keys += other.active_keys;
        self.expired_keys += other.expired_keys;
        self.used_memory_bytes += other.used_memory_bytes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_set_get() {
        let mut store = MemoryStore::new();
        store.set("key1", Value::string("value1"));

        let value = store.get(&Bytes::from("key1")).unwrap();
        assert_eq!(value.as_string().unwrap(), &Bytes::from("value1"));
    }

    #[test]
    fn test_delete() {
        let mut store = MemoryStore::new();
        store.set("key1", Value::string("value1"));

        assert!(store.delete(&Bytes::from("key1")));
        assert!(!store.exists(&Bytes::from("key1")));
        assert!(!store.delete(&Bytes::from("key1")));
    }

    #[test]
    fn test_expiration_follows_cached_clock() {
        let mut store = MemoryStore::new();
        store.set_time(1_000);
        store.set("key1", Value::string("value1"));
        assert!(store.expire_at(&Bytes::from("key1"), 2_000));

        store.set_time(1_999);
        assert!(store.exists(&Bytes::from("key1")));
        assert_eq!(store.ttl_ms(&Bytes::from("key1")), 1);

        store.set_time(2_000);
        assert!(!store.exists(&Bytes::from("key1")));
        assert_eq!(store.ttl_ms(&Bytes::from("key1")), -2);
        assert_eq!(store.stats().expired_keys, 1);
    }

    #[test]
    fn test_restore_snapshot() {
        let mut store = MemoryStore::new();
        let key = Bytes::from("k");

        let before = store.entry(&key);
        store.set(key.clone(), Value::string("new"));
        store.restore(key.clone(), before);
        assert!(!store.exists(&key));

        store.set(key.clone(), Value::string("old"));
        let before = store.entry(&key);
        store.set(key.clone(), Value::string("new"));
        store.restore(key.clone(), before);
        assert_eq!(store.get(&key).and_then(|v| v.as_string()).cloned(), Some(Bytes::from("old")));
    }
}
