//! Backing Store Adapter
//!
//! Wraps a [`BackingStore`] behind the cache's loading mode and write policy.
//! Asynchronous loads and write-back saves run on one dedicated loader
//! thread, so at most one backing-store request issued through this path is
//! in flight at a time.
//!
//! Writes are tracked per key from before the cache entry is stored until the
//! save has reached the store, so readers of the store can tell whether it
//! may still lag behind the cache.

use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use ahash::RandomState;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::BackingStore;
use crate::config::{LoadingMode, WritePolicy};
use crate::error::{CacheError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// In-flight write count per key. Keys with no pending write are absent.
type PendingWrites<K> = DashMap<K, usize, RandomState>;

// == Store Adapter ==
pub struct StoreAdapter<K, V> {
    store: Arc<dyn BackingStore<K, V>>,
    loading_mode: LoadingMode,
    write_policy: WritePolicy,
    worker: Option<LoaderWorker>,
    pending: Arc<PendingWrites<K>>,
}

impl<K, V> StoreAdapter<K, V>
where
    K: fmt::Debug + Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates the adapter, starting the loader thread when the loading mode
    /// or the write policy needs it.
    pub fn new(
        store: Arc<dyn BackingStore<K, V>>,
        loading_mode: LoadingMode,
        write_policy: WritePolicy,
    ) -> Result<Self> {
        let needs_worker =
            loading_mode == LoadingMode::Async || write_policy == WritePolicy::WriteBack;
        let worker = if needs_worker {
            Some(LoaderWorker::spawn()?)
        } else {
            None
        };

        Ok(Self {
            store,
            loading_mode,
            write_policy,
            worker,
            pending: Arc::new(DashMap::with_hasher(RandomState::new())),
        })
    }

    // == Direct Store Access ==
    pub fn load(&self, key: &K) -> Result<Option<V>> {
        self.store.load(key).map_err(CacheError::BackingStore)
    }

    pub fn save(&self, key: &K, value: &V) -> Result<()> {
        self.store.save(key, value).map_err(CacheError::BackingStore)
    }

    pub fn remove(&self, key: &K) -> Result<()> {
        self.store.remove(key).map_err(CacheError::BackingStore)
    }

    // == Load For Miss ==
    /// Loads `key` to fill a cache miss.
    ///
    /// Under [`LoadingMode::Sync`] the load runs on the calling thread and
    /// failures propagate. Under [`LoadingMode::Async`] it runs on the loader
    /// thread while the caller blocks on the result; failures are logged and
    /// reported as `None`.
    ///
    /// # Panics
    /// Under [`LoadingMode::Async`], when called from inside an asynchronous
    /// execution context (this is a blocking call).
    pub fn load_for_miss(&self, key: &K) -> Result<Option<V>> {
        match self.loading_mode {
            LoadingMode::Sync => self.load(key),
            LoadingMode::Async => Ok(self.load_on_worker(key)),
        }
    }

    fn load_on_worker(&self, key: &K) -> Option<V> {
        let Some(worker) = &self.worker else {
            warn!(?key, "Async load requested without a loader thread");
            return None;
        };

        let (reply, result) = oneshot::channel();
        let store = Arc::clone(&self.store);
        let job_key = key.clone();
        let submitted = worker.submit(Box::new(move || {
            let _ = reply.send(store.load(&job_key));
        }));
        if !submitted {
            warn!(?key, "Loader thread is gone, treating load as a miss");
            return None;
        }

        match result.blocking_recv() {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                warn!(?key, error = %err, "Async load failed");
                None
            }
            Err(_) => {
                warn!(?key, "Async load was dropped before completing");
                None
            }
        }
    }

    // == Pending Writes ==
    /// Marks a write to `key` as in flight until the returned token is
    /// dropped. Call before the cache entry is stored, then hand the token to
    /// [`persist`](Self::persist).
    pub fn begin_write(&self, key: &K) -> PendingWrite<K> {
        *self.pending.entry(key.clone()).or_insert(0) += 1;
        PendingWrite {
            pending: Arc::clone(&self.pending),
            key: key.clone(),
        }
    }

    /// True while a write to `key` has not yet reached the backing store.
    pub fn has_pending_write(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    // == Persist ==
    /// Writes `value` to the backing store according to the write policy.
    ///
    /// Write-through saves before returning and propagates failures.
    /// Write-back queues the save on the loader thread and returns at once;
    /// failures are only logged. Either way `write` is released once the
    /// save has finished or failed.
    pub fn persist(&self, key: &K, value: &V, write: PendingWrite<K>) -> Result<()> {
        match self.write_policy {
            WritePolicy::WriteThrough => {
                let saved = self
                    .store
                    .save_with_policy(key, value, WritePolicy::WriteThrough)
                    .map_err(CacheError::BackingStore);
                drop(write);
                saved
            }
            WritePolicy::WriteBack => {
                self.queue_write_back(key, value, write);
                Ok(())
            }
            policy @ (WritePolicy::WriteAround | WritePolicy::WriteBehind) => {
                Err(CacheError::UnsupportedWritePolicy(policy))
            }
        }
    }

    fn queue_write_back(&self, key: &K, value: &V, write: PendingWrite<K>) {
        let Some(worker) = &self.worker else {
            warn!(?key, "Write-back requested without a loader thread");
            return;
        };

        let store = Arc::clone(&self.store);
        let job_key = key.clone();
        let job_value = value.clone();
        let submitted = worker.submit(Box::new(move || {
            if let Err(err) = store.save_with_policy(&job_key, &job_value, WritePolicy::WriteBack) {
                warn!(key = ?job_key, error = %err, "Write-back save failed");
            }
            drop(write);
        }));
        if !submitted {
            warn!(?key, "Loader thread is gone, write-back dropped");
        }
    }
}

// == Pending Write ==
/// Token for one in-flight write; releases it on drop.
pub struct PendingWrite<K>
where
    K: Eq + Hash,
{
    pending: Arc<PendingWrites<K>>,
    key: K,
}

impl<K> Drop for PendingWrite<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        self.pending.remove_if_mut(&self.key, |_, count| {
            *count -= 1;
            *count == 0
        });
    }
}

// == Loader Worker ==
/// A single OS thread draining a job queue in submission order.
///
/// Dropping the worker closes the queue; jobs already queued still run.
struct LoaderWorker {
    jobs: mpsc::UnboundedSender<Job>,
}

impl LoaderWorker {
    fn spawn() -> Result<Self> {
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();

        thread::Builder::new()
            .name("ember-cache-loader".to_string())
            .spawn(move || {
                while let Some(job) = queue.blocking_recv() {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        warn!("Backing store job panicked");
                    }
                }
                debug!("Loader thread stopped");
            })?;

        Ok(Self { jobs })
    }

    fn submit(&self, job: Job) -> bool {
        self.jobs.send(job).is_ok()
    }
}
