//! Backing Store Module
//!
//! The external store the cache fills misses from and persists writes to.
//! Only the contract lives here, plus an in-memory implementation used by
//! the demo binary and the tests.

mod adapter;

pub use adapter::StoreAdapter;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use anyhow::bail;
use dashmap::DashMap;

use crate::config::WritePolicy;

// == Backing Store ==
/// Contract for the persistent store behind the cache.
///
/// Implementations must be shareable across the caller threads, the
/// scheduler's blocking pool and the loader thread.
pub trait BackingStore<K, V>: Send + Sync + 'static {
    /// Loads the value for `key`, `None` if the store has no such key.
    fn load(&self, key: &K) -> anyhow::Result<Option<V>>;

    fn save(&self, key: &K, value: &V) -> anyhow::Result<()>;

    /// Saves under an explicit write policy.
    ///
    /// The default accepts the policies the cache implements and refuses the
    /// rest, so a store never silently honors a policy it cannot express.
    fn save_with_policy(&self, key: &K, value: &V, policy: WritePolicy) -> anyhow::Result<()> {
        match policy {
            WritePolicy::WriteThrough | WritePolicy::WriteBack => self.save(key, value),
            WritePolicy::WriteAround | WritePolicy::WriteBehind => {
                bail!("write policy {} is not supported by this store", policy)
            }
        }
    }

    fn remove(&self, key: &K) -> anyhow::Result<()>;

    /// Copy of every stored entry. Diagnostics and bulk export only.
    fn snapshot(&self) -> anyhow::Result<HashMap<K, V>>;
}

// == Memory Store ==
/// Backing store that keeps everything in a concurrent map.
pub struct MemoryStore<K, V> {
    entries: DashMap<K, V>,
}

impl<K, V> MemoryStore<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> fmt::Debug for MemoryStore<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("len", &self.entries.len())
            .finish()
    }
}

impl<K, V> Default for MemoryStore<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> BackingStore<K, V> for MemoryStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn load(&self, key: &K) -> anyhow::Result<Option<V>> {
        Ok(self.entries.get(key).map(|value| value.clone()))
    }

    fn save(&self, key: &K, value: &V) -> anyhow::Result<()> {
        self.entries.insert(key.clone(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &K) -> anyhow::Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn snapshot(&self) -> anyhow::Result<HashMap<K, V>> {
        Ok(self
            .entries
            .iter()
            .map(|item| (item.key().clone(), item.value().clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();

        assert_eq!(store.load(&"k").unwrap(), None);
        store.save(&"k", &1).unwrap();
        assert_eq!(store.load(&"k").unwrap(), Some(1));

        store.remove(&"k").unwrap();
        assert_eq!(store.load(&"k").unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let store = MemoryStore::new();
        store.save(&"a", &1).unwrap();
        store.save(&"b", &2).unwrap();

        let snapshot = store.snapshot().unwrap();
        store.save(&"c", &3).unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("a"), Some(&1));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_save_with_policy_refuses_unimplemented_policies() {
        let store = MemoryStore::new();

        store.save_with_policy(&"a", &1, WritePolicy::WriteThrough).unwrap();
        store.save_with_policy(&"b", &2, WritePolicy::WriteBack).unwrap();
        assert!(store.save_with_policy(&"c", &3, WritePolicy::WriteAround).is_err());
        assert!(store.save_with_policy(&"d", &4, WritePolicy::WriteBehind).is_err());

        assert_eq!(store.len(), 2);
        assert_eq!(store.load(&"c").unwrap(), None);
    }
}
