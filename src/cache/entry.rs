//! Cache Entry Module
//!
//! Defines the immutable value + expiry pair stored for every live key.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

// == Expiry ==
/// How the expiry timestamp of a new entry is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// The entry never expires
    Never,
    /// The entry expires this long after it is written
    After(Duration),
    /// The entry expires at this Unix timestamp in milliseconds
    At(u64),
}

impl Expiry {
    /// Converts a wall-clock deadline into an absolute expiry.
    ///
    /// Deadlines before the Unix epoch clamp to it and are already expired.
    pub fn at(deadline: DateTime<Utc>) -> Self {
        Expiry::At(deadline.timestamp_millis().max(0) as u64)
    }

    /// Resolves the expiry timestamp relative to `now`.
    pub fn deadline_from(self, now: u64) -> Option<u64> {
        match self {
            Expiry::Never => None,
            Expiry::After(ttl) => Some(now.saturating_add(ttl.as_millis() as u64)),
            Expiry::At(deadline) => Some(deadline),
        }
    }
}

// == Cache Entry ==
/// A cached value and the timestamp after which it is stale.
///
/// Entries are never mutated in place; an update replaces the whole entry
/// and gives it a fresh write stamp.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,
    expires_at: Option<u64>,
    stamp: u64,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new entry expiring at `expires_at` (Unix milliseconds).
    pub fn new(value: V, expires_at: Option<u64>, stamp: u64) -> Self {
        Self {
            value,
            expires_at,
            stamp,
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }

    /// Monotonic write stamp assigned by the store that holds this entry.
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time is greater than or equal to
    /// its expiration time.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(expires) if now >= expires)
    }

    // == Time To Live ==
    /// Returns remaining TTL, or None if no expiration is set.
    ///
    /// Expired entries report `Some(Duration::ZERO)`.
    #[cfg(test)]
    pub fn ttl_remaining(&self) -> Option<Duration> {
        let now = current_timestamp_ms();
        self.expires_at
            .map(|expires| Duration::from_millis(expires.saturating_sub(now)))
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
