//! Entry Store Module
//!
//! The primary value store: a sharded concurrent map from key to entry.
//! Holds no eviction logic; capacity is enforced by the recency tracker.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::RandomState;
use dashmap::DashMap;

use crate::cache::entry::{current_timestamp_ms, CacheEntry, Expiry};

// == Entry Store ==
/// Thread-safe map from key to [`CacheEntry`].
///
/// Every write assigns a fresh stamp so callers can make later removals and
/// replacements conditional on the entry they observed.
pub struct EntryStore<K, V> {
    entries: DashMap<K, CacheEntry<V>, RandomState>,
    next_stamp: AtomicU64,
}

impl<K, V> EntryStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            next_stamp: AtomicU64::new(1),
        }
    }

    // == Put ==
    /// Inserts or overwrites the entry for `key`. Returns the new stamp.
    pub fn put(&self, key: K, value: V, expiry: Expiry) -> u64 {
        let entry = self.make_entry(value, expiry);
        let stamp = entry.stamp();
        self.entries.insert(key, entry);
        stamp
    }

    /// Replaces the entry for `key` only if it still carries `expected` stamp.
    ///
    /// Returns the new stamp on success, None if the entry was removed or
    /// overwritten in the meantime.
    pub fn replace_if_stamp(&self, key: &K, expected: u64, value: V, expiry: Expiry) -> Option<u64> {
        let mut slot = self.entries.get_mut(key)?;
        if slot.stamp() != expected {
            return None;
        }
        let entry = self.make_entry(value, expiry);
        let stamp = entry.stamp();
        *slot = entry;
        Some(stamp)
    }

    // == Get ==
    pub fn get(&self, key: &K) -> Option<CacheEntry<V>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    // == Remove ==
    /// Removes the entry for `key` if `predicate` accepts it.
    ///
    /// The predicate runs while the key's shard is write-locked, so no write
    /// to `key` can land between the check and the removal.
    pub fn remove_if<F>(&self, key: &K, predicate: F) -> Option<CacheEntry<V>>
    where
        F: FnOnce(&CacheEntry<V>) -> bool,
    {
        self.entries
            .remove_if(key, |_, entry| predicate(entry))
            .map(|(_, entry)| entry)
    }

    /// Removes the entry for `key` only if it still carries `stamp`.
    pub fn remove_if_stamp(&self, key: &K, stamp: u64) -> Option<CacheEntry<V>> {
        self.remove_if(key, |entry| entry.stamp() == stamp)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries; the authoritative cache size.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn make_entry(&self, value: V, expiry: Expiry) -> CacheEntry<V> {
        let stamp = self.next_stamp.fetch_add(1, Ordering::Relaxed);
        CacheEntry::new(value, expiry.deadline_from(current_timestamp_ms()), stamp)
    }
}

impl<K, V> Default for EntryStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
