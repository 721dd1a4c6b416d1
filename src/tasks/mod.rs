//! Background Tasks Module
//!
//! Contains the per-key timers that run while the cache is alive.
//!
//! # Tasks
//! - Cleanup: removes an entry once its deadline passes
//! - Refresh: periodically reloads an entry from the backing store

mod scheduler;

pub use scheduler::{Scheduler, TimerTask};
