//! Expiry and Refresh Scheduler
//!
//! Runs the per-key background timers: a one-shot cleanup that fires when an
//! entry's deadline passes, and a periodic refresh. Each key owns at most one
//! live timer of each kind; arming a new one aborts the previous, so the
//! number of outstanding timers stays bounded by the number of live keys.
//!
//! Timers sleep on a dedicated tokio runtime. When one fires, its callback
//! runs on the runtime's blocking pool, since callbacks may block on
//! backing-store I/O.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ahash::RandomState;
use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Callback run when a timer fires.
pub type TimerTask = Arc<dyn Fn() + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Cleanup,
    Refresh,
}

struct Timer {
    id: u64,
    stamp: u64,
    abort: AbortHandle,
}

#[derive(Default)]
struct KeyTimers {
    cleanup: Option<Timer>,
    refresh: Option<Timer>,
}

impl KeyTimers {
    fn slot(&mut self, kind: TimerKind) -> &mut Option<Timer> {
        match kind {
            TimerKind::Cleanup => &mut self.cleanup,
            TimerKind::Refresh => &mut self.refresh,
        }
    }

    fn abort_all(self) {
        for timer in [self.cleanup, self.refresh].into_iter().flatten() {
            timer.abort.abort();
        }
    }

    fn count(&self) -> usize {
        self.cleanup.is_some() as usize + self.refresh.is_some() as usize
    }

    fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

type TimerTable<K> = Mutex<HashMap<K, KeyTimers, RandomState>>;

// == Scheduler ==
pub struct Scheduler<K> {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    timers: Arc<TimerTable<K>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl<K> Scheduler<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Starts the scheduler runtime with one worker per available core.
    pub fn new() -> Result<Self> {
        let workers = thread::available_parallelism().map_or(1, |n| n.get());
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("ember-cache-scheduler")
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();

        info!("Scheduler started with {} worker threads", workers);

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            timers: Arc::new(Mutex::new(HashMap::default())),
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        })
    }

    // == Arm Cleanup ==
    /// Arms the one-shot cleanup timer for `key`, replacing any previous one.
    ///
    /// `stamp` identifies the entry write the timer belongs to; a timer armed
    /// for a newer stamp is never replaced by an older one. Returns false if
    /// the request was rejected.
    pub fn arm_cleanup(&self, key: K, stamp: u64, delay: Duration, task: TimerTask) -> bool {
        let timers = Arc::clone(&self.timers);
        let timer_key = key.clone();
        self.arm(key, stamp, TimerKind::Cleanup, move |id| async move {
            time::sleep(delay).await;
            release(&timers, &timer_key, TimerKind::Cleanup, id);
            run_callback(task, TimerKind::Cleanup).await;
        })
    }

    // == Arm Refresh ==
    /// Arms the periodic refresh timer for `key`, replacing any previous one.
    ///
    /// The first run happens one `period` from now. Runs never overlap: the
    /// next tick is awaited only after the previous callback has returned.
    pub fn arm_refresh(&self, key: K, stamp: u64, period: Duration, task: TimerTask) -> bool {
        if period.is_zero() {
            return false;
        }
        self.arm(key, stamp, TimerKind::Refresh, move |_| async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                run_callback(Arc::clone(&task), TimerKind::Refresh).await;
            }
        })
    }

    fn arm<F, Fut>(&self, key: K, stamp: u64, kind: TimerKind, make: F) -> bool
    where
        F: FnOnce(u64) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut table = self.timers.lock();
        // Checked under the table lock so shutdown cannot miss a new timer
        if self.shut_down.load(Ordering::Acquire) {
            debug!("Scheduler is shut down, timer rejected");
            return false;
        }

        let slot = table.entry(key).or_default().slot(kind);
        if let Some(current) = slot {
            if current.stamp > stamp {
                return false;
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let abort = self.handle.spawn(make(id)).abort_handle();
        if let Some(previous) = slot.replace(Timer { id, stamp, abort }) {
            previous.abort.abort();
        }
        true
    }

    // == Cancel ==
    /// Aborts every timer armed for `key`.
    pub fn cancel(&self, key: &K) {
        if let Some(timers) = self.timers.lock().remove(key) {
            timers.abort_all();
        }
    }

    /// Aborts the timers for `key` that were armed for `stamp` or earlier.
    pub fn cancel_stale(&self, key: &K, stamp: u64) {
        let mut table = self.timers.lock();
        let Some(timers) = table.get_mut(key) else {
            return;
        };

        for kind in [TimerKind::Cleanup, TimerKind::Refresh] {
            let slot = timers.slot(kind);
            if slot.as_ref().is_some_and(|timer| timer.stamp <= stamp) {
                if let Some(timer) = slot.take() {
                    timer.abort.abort();
                }
            }
        }

        if timers.is_empty() {
            table.remove(key);
        }
    }

    pub fn cancel_all(&self) {
        let drained: Vec<KeyTimers> = self.timers.lock().drain().map(|(_, t)| t).collect();
        for timers in drained {
            timers.abort_all();
        }
    }

    /// Number of timers armed and not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.timers.lock().values().map(KeyTimers::count).sum()
    }

    #[cfg(test)]
    pub fn pending_for(&self, key: &K) -> usize {
        self.timers.lock().get(key).map_or(0, KeyTimers::count)
    }

    #[cfg(test)]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    // == Shutdown ==
    /// Stops the scheduler.
    ///
    /// New arm requests are rejected, timers that have not fired are
    /// discarded, and callbacks already running finish on their own.
    pub fn shutdown(&self) {
        {
            let _table = self.timers.lock();
            if self.shut_down.swap(true, Ordering::AcqRel) {
                return;
            }
        }
        self.cancel_all();

        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
        info!("Scheduler shut down");
    }
}

impl<K> Drop for Scheduler<K> {
    fn drop(&mut self) {
        // shutdown_background is safe to call from within a runtime context
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

/// Runs a timer callback on the blocking pool and reports a panic.
///
/// Aborting the awaiting timer task does not stop a callback already started.
async fn run_callback(task: TimerTask, kind: TimerKind) {
    if let Err(err) = tokio::task::spawn_blocking(move || task()).await {
        if err.is_panic() {
            warn!(?kind, "Timer callback panicked");
        }
    }
}

/// Drops the table entry of a one-shot timer that just fired, unless it was
/// already replaced by a newer timer.
fn release<K>(timers: &TimerTable<K>, key: &K, kind: TimerKind, id: u64)
where
    K: Eq + Hash,
{
    let mut table = timers.lock();
    let Some(key_timers) = table.get_mut(key) else {
        return;
    };

    let slot = key_timers.slot(kind);
    if slot.as_ref().is_some_and(|timer| timer.id == id) {
        slot.take();
    }
    if key_timers.is_empty() {
        table.remove(key);
    }
}
