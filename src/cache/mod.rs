//! Cache Module
//!
//! Provides the bounded in-memory cache with TTL expiry, LRU eviction and
//! refresh-ahead from a backing store.

mod engine;
mod entry;
mod lru;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use engine::{Cache, ExpiryListener};
pub use entry::{current_timestamp_ms, CacheEntry, Expiry};
pub use lru::RecencyTracker;
pub use stats::CacheStats;
pub use store::EntryStore;
