//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::sleep;
use std::time::{Duration, Instant};

use ember_cache::{BackingStore, CacheConfig, MemoryStore};

/// Memory store that counts the calls made to it.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore<String, String>,
    loads: AtomicUsize,
    saves: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes directly to the store, bypassing the counters.
    pub fn seed(&self, key: &str, value: &str) {
        self.inner.save(&key.to_string(), &value.to_string()).unwrap();
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.inner.load(&key.to_string()).unwrap()
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl BackingStore<String, String> for CountingStore {
    fn load(&self, key: &String) -> anyhow::Result<Option<String>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(key)
    }

    fn save(&self, key: &String, value: &String) -> anyhow::Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(key, value)
    }

    fn remove(&self, key: &String) -> anyhow::Result<()> {
        self.inner.remove(key)
    }

    fn snapshot(&self) -> anyhow::Result<HashMap<String, String>> {
        self.inner.snapshot()
    }
}

/// Memory store whose saves take `delay` to land.
pub struct SlowSaveStore {
    inner: MemoryStore<String, String>,
    delay: Duration,
}

impl SlowSaveStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay,
        }
    }

    /// Writes directly to the store, without the delay.
    pub fn seed(&self, key: &str, value: &str) {
        self.inner.save(&key.to_string(), &value.to_string()).unwrap();
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.inner.load(&key.to_string()).unwrap()
    }
}

impl BackingStore<String, String> for SlowSaveStore {
    fn load(&self, key: &String) -> anyhow::Result<Option<String>> {
        self.inner.load(key)
    }

    fn save(&self, key: &String, value: &String) -> anyhow::Result<()> {
        sleep(self.delay);
        self.inner.save(key, value)
    }

    fn remove(&self, key: &String) -> anyhow::Result<()> {
        self.inner.remove(key)
    }

    fn snapshot(&self) -> anyhow::Result<HashMap<String, String>> {
        self.inner.snapshot()
    }
}

/// Store that fails every operation.
pub struct FailingStore;

impl BackingStore<String, String> for FailingStore {
    fn load(&self, _key: &String) -> anyhow::Result<Option<String>> {
        anyhow::bail!("backing store unavailable")
    }

    fn save(&self, _key: &String, _value: &String) -> anyhow::Result<()> {
        anyhow::bail!("backing store unavailable")
    }

    fn remove(&self, _key: &String) -> anyhow::Result<()> {
        anyhow::bail!("backing store unavailable")
    }

    fn snapshot(&self) -> anyhow::Result<HashMap<String, String>> {
        anyhow::bail!("backing store unavailable")
    }
}

/// Config with the given size, TTL and refresh period; other settings default.
pub fn config(max_size: usize, ttl_ms: u64, refresh_ms: u64) -> CacheConfig {
    CacheConfig {
        max_size,
        ttl_ms,
        refresh_ms,
        ..CacheConfig::default()
    }
}

pub fn s(value: &str) -> String {
    value.to_string()
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10));
    }
    condition()
}
