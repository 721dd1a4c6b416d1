//! Cache Engine Module
//!
//! The cache facade. Composes the entry store, the recency tracker, the
//! backing store adapter and the scheduler behind `put`/`get`/`remove`.
//!
//! Lifecycle of a key: absent, then live after a `put` or a miss-filling
//! `get`, then back to absent once it is evicted, removed or expired.
//! Background timers never act on the entry they were armed for; they
//! re-read the current entry and compare write stamps before changing it.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::backing::{BackingStore, StoreAdapter};
use crate::cache::entry::{current_timestamp_ms, CacheEntry, Expiry};
use crate::cache::lru::RecencyTracker;
use crate::cache::stats::{CacheStats, StatsRecorder};
use crate::cache::store::EntryStore;
use crate::config::{CacheConfig, ExpirationStrategy};
use crate::error::Result;
use crate::tasks::{Scheduler, TimerTask};

/// Callback invoked with the key of every entry the cleanup task expires.
pub type ExpiryListener<K> = Arc<dyn Fn(&K) + Send + Sync + 'static>;

/// Where an installed value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// A caller write; persisted per the write policy
    Write,
    /// Loaded from the backing store; never written back
    Fill,
}

// == Cache ==
/// Bounded key-value cache with TTL expiry, LRU eviction, refresh-ahead and
/// a backing store for miss-fill and persistence.
///
/// Handles are cheap to clone and share the same cache.
pub struct Cache<K, V> {
    inner: Arc<Inner<K, V>>,
}

struct Inner<K, V> {
    config: CacheConfig,
    entries: EntryStore<K, V>,
    recency: RecencyTracker<K>,
    backing: StoreAdapter<K, V>,
    scheduler: Scheduler<K>,
    stats: StatsRecorder,
    on_expire: Option<ExpiryListener<K>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    // == Constructors ==
    /// Creates a cache over `store`.
    ///
    /// Fails with a configuration error if the write or eviction policy is
    /// not implemented, or if the scheduler cannot start.
    pub fn new<S>(config: CacheConfig, store: Arc<S>) -> Result<Self>
    where
        S: BackingStore<K, V>,
    {
        Self::build(config, store, None)
    }

    /// Creates a cache that calls `listener` whenever the cleanup task
    /// removes an expired entry. Evictions and explicit removals are not
    /// reported.
    pub fn with_expiry_listener<S, F>(config: CacheConfig, store: Arc<S>, listener: F) -> Result<Self>
    where
        S: BackingStore<K, V>,
        F: Fn(&K) + Send + Sync + 'static,
    {
        let listener: ExpiryListener<K> = Arc::new(listener);
        Self::build(config, store, Some(listener))
    }

    fn build(
        config: CacheConfig,
        store: Arc<dyn BackingStore<K, V>>,
        on_expire: Option<ExpiryListener<K>>,
    ) -> Result<Self> {
        config.validate()?;

        let backing = StoreAdapter::new(store, config.loading_mode, config.write_policy)?;
        let scheduler = Scheduler::new()?;

        info!(
            "Cache initialized: max_size={}, ttl_ms={}, refresh_ms={}, expiration={}, write_policy={}, loading_mode={}, eviction_policy={}",
            config.max_size,
            config.ttl_ms,
            config.refresh_ms,
            config.expiration,
            config.write_policy,
            config.loading_mode,
            config.eviction_policy
        );

        Ok(Self {
            inner: Arc::new(Inner {
                entries: EntryStore::with_capacity(config.max_size),
                recency: RecencyTracker::new(config.max_size),
                backing,
                scheduler,
                stats: StatsRecorder::default(),
                on_expire,
                config,
            }),
        })
    }

    // == Put ==
    /// Stores `value` under `key`, evicting the least recently used entry if
    /// the cache is full.
    ///
    /// The expiry follows the configured strategy: `ttl_ms` after now when
    /// relative, `ttl_ms` read as a Unix-millisecond deadline when absolute.
    /// Under write-through the value is saved before this returns; a failed
    /// save leaves the cache without the entry and returns the error.
    pub fn put(&self, key: K, value: V) -> Result<()> {
        let expiry = self.inner.write_expiry();
        self.inner.install(key, value, expiry, Origin::Write)
    }

    /// Stores `value` under `key` with a fixed wall-clock deadline.
    pub fn put_until(&self, key: K, value: V, deadline: DateTime<Utc>) -> Result<()> {
        self.inner.install(key, value, Expiry::at(deadline), Origin::Write)
    }

    // == Get ==
    /// Returns the value for `key`.
    ///
    /// A fresh entry counts as a use for LRU purposes. An expired entry is
    /// removed and reported as absent without consulting the backing store;
    /// the next call fills it. A key the cache does not hold is loaded from
    /// the backing store and cached.
    ///
    /// This is a blocking call regardless of the loading mode.
    ///
    /// # Errors
    /// Backing-store failures under [`LoadingMode::Sync`](crate::config::LoadingMode).
    /// Under the async mode failures read as `None`.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let inner = &self.inner;

        match inner.entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                inner.touch(key);
                inner.stats.record_hit();
                Ok(Some(entry.into_value()))
            }
            Some(entry) => {
                inner.stats.record_miss();
                inner.expire_locally(key, entry.stamp());
                Ok(None)
            }
            None => {
                inner.stats.record_miss();
                let Some(value) = inner.backing.load_for_miss(key)? else {
                    return Ok(None);
                };
                inner.stats.record_load();
                inner.install(key.clone(), value.clone(), inner.write_expiry(), Origin::Fill)?;
                Ok(Some(value))
            }
        }
    }

    /// Returns true if `key` holds a fresh entry. Does not count as a use
    /// and never consults the backing store.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    // == Remove ==
    /// Removes `key` from the cache. The backing store is left untouched.
    ///
    /// Returns the removed value if it was still fresh.
    pub fn remove(&self, key: &K) -> Option<V> {
        let inner = &self.inner;
        inner.recency.remove(key);

        inner
            .discard_untracked(key)
            .filter(|entry| !entry.is_expired())
            .map(CacheEntry::into_value)
    }

    /// Removes `key` from the cache and from the backing store.
    pub fn delete(&self, key: &K) -> Result<Option<V>> {
        let removed = self.remove(key);
        self.inner.backing.remove(key)?;
        Ok(removed)
    }

    // == Clear ==
    /// Drops every cached entry and its timers. The backing store is left
    /// untouched.
    pub fn clear(&self) {
        let inner = &self.inner;
        inner.scheduler.cancel_all();
        inner.entries.clear();
        inner.recency.clear();
    }

    /// Number of cached entries, including expired ones not yet cleaned up.
    pub fn size(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot(self.size())
    }

    /// Number of background timers armed and not yet fired.
    pub fn pending_timers(&self) -> usize {
        self.inner.scheduler.pending()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    // == Shutdown ==
    /// Stops background expiry and refresh for every handle of this cache.
    ///
    /// Timers that have not fired are discarded and no new ones are armed;
    /// callbacks already running finish. The cache keeps serving reads and
    /// writes, with expiry enforced lazily on `get`.
    pub fn shutdown(&self) {
        self.inner.scheduler.shutdown();
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    fn write_expiry(&self) -> Expiry {
        match (self.config.expiration, self.config.ttl_ms) {
            (_, 0) => Expiry::Never,
            (ExpirationStrategy::Relative, ttl) => Expiry::After(Duration::from_millis(ttl)),
            (ExpirationStrategy::Absolute, deadline) => Expiry::At(deadline),
        }
    }

    /// Relative entries get a fresh TTL on refresh; absolute ones keep their
    /// deadline.
    fn refresh_expiry(&self, current: &CacheEntry<V>) -> Expiry {
        match self.config.expiration {
            ExpirationStrategy::Relative => self.write_expiry(),
            ExpirationStrategy::Absolute => current.expires_at().map_or(Expiry::Never, Expiry::At),
        }
    }

    // == Install ==
    /// Evict-if-needed, store, persist, arm timers.
    fn install(self: &Arc<Self>, key: K, value: V, expiry: Expiry, origin: Origin) -> Result<()> {
        self.touch(&key);

        // Registered before the entry becomes visible to refresh
        let write = (origin == Origin::Write).then(|| self.backing.begin_write(&key));
        let stamp = self.entries.put(key.clone(), value.clone(), expiry);

        if let Some(write) = write {
            if let Err(err) = self.backing.persist(&key, &value, write) {
                if self.entries.remove_if_stamp(&key, stamp).is_some() {
                    self.untrack(&key);
                }
                return Err(err);
            }
        }

        // A concurrent insert may have evicted the key between touch and put
        if !self.recency.contains(&key) {
            self.entries.remove_if_stamp(&key, stamp);
            debug!(?key, "Entry evicted while being installed");
            return Ok(());
        }

        self.arm_timers(&key, stamp);
        Ok(())
    }

    /// Marks `key` most recently used and releases the evicted key, if any.
    fn touch(&self, key: &K) {
        if let Some(victim) = self.recency.record_access(key) {
            self.evict(&victim);
        }
    }

    fn evict(&self, victim: &K) {
        if self.discard_untracked(victim).is_some() {
            self.stats.record_eviction();
            debug!(key = ?victim, "Evicted least recently used entry");
        }
    }

    /// Removes the entry for `key` and its timers, unless a concurrent put
    /// has tracked the key again since it was dropped from the tracker.
    fn discard_untracked(&self, key: &K) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove_if(key, |_| !self.recency.contains(key))?;
        self.scheduler.cancel_stale(key, entry.stamp());
        Some(entry)
    }

    /// Drops `key` from the tracker after its entry was removed, keeping it
    /// tracked if a newer entry landed in the meantime.
    fn untrack(&self, key: &K) {
        self.recency.remove(key);
        if self.entries.get(key).is_some() {
            self.touch(key);
        }
    }

    fn expire_locally(&self, key: &K, stamp: u64) -> bool {
        if self.entries.remove_if_stamp(key, stamp).is_none() {
            return false;
        }
        self.untrack(key);
        self.scheduler.cancel_stale(key, stamp);
        self.stats.record_expiration();
        true
    }

    // == Timers ==
    fn arm_timers(self: &Arc<Self>, key: &K, stamp: u64) {
        // Only the latest write arms timers
        let Some(entry) = self.entries.get(key).filter(|entry| entry.stamp() == stamp) else {
            return;
        };

        if let Some(deadline) = entry.expires_at() {
            let delay = Duration::from_millis(deadline.saturating_sub(current_timestamp_ms()));
            let weak = Arc::downgrade(self);
            let task_key = key.clone();
            let task: TimerTask = Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.run_cleanup(&task_key);
                }
            });
            self.scheduler.arm_cleanup(key.clone(), stamp, delay, task);
        }

        if let Some(period) = self.config.refresh_period() {
            let weak = Arc::downgrade(self);
            let task_key = key.clone();
            let task: TimerTask = Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.run_refresh(&task_key, stamp);
                }
            });
            self.scheduler.arm_refresh(key.clone(), stamp, period, task);
        }
    }

    // == Cleanup Task ==
    /// Removes `key` if its current entry is past its deadline.
    fn run_cleanup(&self, key: &K) {
        let Some(entry) = self.entries.get(key) else {
            return;
        };
        if !entry.is_expired() || !self.expire_locally(key, entry.stamp()) {
            return;
        }

        debug!(?key, "Expired entry removed");
        if let Some(listener) = &self.on_expire {
            listener(key);
        }
    }

    // == Refresh Task ==
    /// Reloads `key` from the backing store and substitutes the value if it
    /// changed and no newer write landed in the meantime.
    fn run_refresh(self: &Arc<Self>, key: &K, armed_stamp: u64) {
        let Some(current) = self.entries.get(key) else {
            self.scheduler.cancel_stale(key, armed_stamp);
            return;
        };
        if current.is_expired() {
            self.expire_locally(key, current.stamp());
            return;
        }
        // The store may still hold the value this entry replaced
        if self.backing.has_pending_write(key) {
            debug!(?key, "Refresh skipped while a write is pending");
            return;
        }

        let fresh = match self.backing.load_for_miss(key) {
            Ok(Some(value)) => value,
            Ok(None) => return,
            Err(err) => {
                warn!(?key, error = %err, "Refresh load failed");
                return;
            }
        };
        if fresh == *current.value() {
            return;
        }

        let expiry = self.refresh_expiry(&current);
        let Some(stamp) = self.entries.replace_if_stamp(key, current.stamp(), fresh, expiry) else {
            debug!(?key, "Refresh superseded by a newer write");
            return;
        };

        self.touch(key);
        self.stats.record_refresh();
        debug!(?key, "Entry refreshed from backing store");
        self.arm_timers(key, stamp);
    }
}
