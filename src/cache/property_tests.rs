//! Property-Based Tests for Cache Module
//!
//! Runs random operation sequences against the cache and a simple model of
//! an LRU cache over a write-through store.

use proptest::prelude::*;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::backing::MemoryStore;
use crate::cache::Cache;
use crate::config::CacheConfig;

// == Test Configuration ==
const TEST_MAX_SIZE: usize = 4;

/// No expiry and no refresh, so only the operations under test change state.
fn timerless_config(max_size: usize) -> CacheConfig {
    CacheConfig {
        max_size,
        ttl_ms: 0,
        refresh_ms: 0,
        ..CacheConfig::default()
    }
}

fn new_cache(max_size: usize) -> Cache<String, u32> {
    Cache::new(timerless_config(max_size), Arc::new(MemoryStore::new())).unwrap()
}

// == Strategies ==
/// Small key space so sequences revisit keys and overflow the cache.
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-h]".prop_map(|s| s)
}

#[derive(Debug, Clone)]
enum CacheOp {
    Put { key: String, value: u32 },
    Get { key: String },
    Remove { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        3 => (key_strategy(), any::<u32>()).prop_map(|(key, value)| CacheOp::Put { key, value }),
        3 => key_strategy().prop_map(|key| CacheOp::Get { key }),
        1 => key_strategy().prop_map(|key| CacheOp::Remove { key }),
    ]
}

// == Model ==
/// Keys in recency order (front is least recent) plus the backing store.
#[derive(Default)]
struct Model {
    order: VecDeque<String>,
    backing: HashMap<String, u32>,
}

impl Model {
    fn touch(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push_back(key.to_string());
        if self.order.len() > TEST_MAX_SIZE {
            self.order.pop_front();
        }
    }

    fn cached(&self, key: &str) -> bool {
        self.order.iter().any(|k| k == key)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // The number of cached entries never exceeds max_size.
    #[test]
    fn prop_capacity_bound(ops in prop::collection::vec(cache_op_strategy(), 1..60)) {
        let cache = new_cache(TEST_MAX_SIZE);

        for op in ops {
            match op {
                CacheOp::Put { key, value } => cache.put(key, value).unwrap(),
                CacheOp::Get { key } => { cache.get(&key).unwrap(); }
                CacheOp::Remove { key } => { cache.remove(&key); }
            }
            prop_assert!(cache.size() <= TEST_MAX_SIZE, "size {} over capacity", cache.size());
        }

        cache.shutdown();
    }

    // Residency, returned values and hit/miss counts follow the LRU model.
    #[test]
    fn prop_matches_lru_model(ops in prop::collection::vec(cache_op_strategy(), 1..60)) {
        let cache = new_cache(TEST_MAX_SIZE);
        let mut model = Model::default();
        let mut expected_hits = 0u64;
        let mut expected_misses = 0u64;

        for op in ops {
            match op {
                CacheOp::Put { key, value } => {
                    cache.put(key.clone(), value).unwrap();
                    model.backing.insert(key.clone(), value);
                    model.touch(&key);
                }
                CacheOp::Get { key } => {
                    if model.cached(&key) {
                        expected_hits += 1;
                    } else {
                        expected_misses += 1;
                    }
                    let expected = model.backing.get(&key).copied();
                    if expected.is_some() {
                        model.touch(&key);
                    }
                    prop_assert_eq!(cache.get(&key).unwrap(), expected);
                }
                CacheOp::Remove { key } => {
                    cache.remove(&key);
                    model.order.retain(|k| *k != key);
                }
            }

            for key in ["a", "b", "c", "d", "e", "f", "g", "h"] {
                let key = key.to_string();
                prop_assert_eq!(cache.contains_key(&key), model.cached(&key), "residency of {}", key);
            }
        }

        let stats = cache.stats();
        prop_assert_eq!(stats.hits, expected_hits);
        prop_assert_eq!(stats.misses, expected_misses);
        prop_assert_eq!(stats.total_entries, model.order.len());

        cache.shutdown();
    }

    // The most recent put wins for every key.
    #[test]
    fn prop_overwrite_keeps_latest(values in prop::collection::vec(any::<u32>(), 1..20)) {
        let cache = new_cache(TEST_MAX_SIZE);
        let key = "k".to_string();

        for value in &values {
            cache.put(key.clone(), *value).unwrap();
        }

        prop_assert_eq!(cache.get(&key).unwrap(), values.last().copied());
        prop_assert_eq!(cache.size(), 1);

        cache.shutdown();
    }

    // Reading a key protects it from the next eviction.
    #[test]
    fn prop_access_protects_from_eviction(touched in 0..TEST_MAX_SIZE) {
        let cache = new_cache(TEST_MAX_SIZE);
        let keys: Vec<String> = (0..TEST_MAX_SIZE).map(|i| format!("k{}", i)).collect();
        for (i, key) in keys.iter().enumerate() {
            cache.put(key.clone(), i as u32).unwrap();
        }

        cache.get(&keys[touched]).unwrap();
        cache.put("new".to_string(), 99).unwrap();

        prop_assert!(cache.contains_key(&keys[touched]));
        let expected_victim = if touched == 0 { &keys[1] } else { &keys[0] };
        prop_assert!(!cache.contains_key(expected_victim));
        prop_assert_eq!(cache.size(), TEST_MAX_SIZE);

        cache.shutdown();
    }
}
