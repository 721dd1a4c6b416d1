//! Ember Cache - an embeddable key-value cache
//!
//! Bounded in-memory storage with TTL expiry, LRU eviction, refresh-ahead
//! and a pluggable backing store for miss-fill and write persistence.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ember_cache::{Cache, CacheConfig, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! let cache = Cache::new(CacheConfig::default(), store)?;
//!
//! cache.put("greeting".to_string(), "hello".to_string())?;
//! assert_eq!(cache.get(&"greeting".to_string())?, Some("hello".to_string()));
//!
//! cache.shutdown();
//! # Ok::<(), ember_cache::CacheError>(())
//! ```

pub mod backing;
pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use backing::{BackingStore, MemoryStore};
pub use cache::{Cache, CacheStats, Expiry};
pub use config::{CacheConfig, EvictionPolicy, ExpirationStrategy, LoadingMode, WritePolicy};
pub use error::{CacheError, Result};
