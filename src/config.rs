//! Configuration Module
//!
//! Defines the immutable cache configuration and the policy enums it selects
//! between. Values can be loaded from environment variables.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CacheError, Result};

// == Policy Enums ==
/// How an entry's expiry timestamp is derived at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpirationStrategy {
    /// Expire `ttl` after the write
    Relative,
    /// Expire at a caller-supplied wall-clock deadline
    Absolute,
}

/// How writes reach the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WritePolicy {
    /// Save synchronously before `put` returns
    WriteThrough,
    /// Queue the save on the background worker
    WriteBack,
    /// Not implemented; rejected at construction
    WriteAround,
    /// Not implemented; rejected at construction
    WriteBehind,
}

/// Where backing-store loads execute on a cache miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadingMode {
    /// On the calling thread
    Sync,
    /// On the dedicated loader thread, caller still blocks on the result
    Async,
}

/// Which entry gives way when the cache is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvictionPolicy {
    /// Least recently used
    Lru,
    /// Not implemented; rejected at construction
    Lfu,
    /// Not implemented; rejected at construction
    Fifo,
}

/// Error returned when a policy name does not match any variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePolicyError(String);

impl fmt::Display for ParsePolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown policy name: {}", self.0)
    }
}

impl std::error::Error for ParsePolicyError {}

macro_rules! policy_names {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Returns the configuration name of this variant.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParsePolicyError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($name => Ok($ty::$variant),)+
                    _ => Err(ParsePolicyError(s.to_string())),
                }
            }
        }
    };
}

policy_names!(ExpirationStrategy {
    Relative => "RELATIVE",
    Absolute => "ABSOLUTE",
});

policy_names!(WritePolicy {
    WriteThrough => "WRITE_THROUGH",
    WriteBack => "WRITE_BACK",
    WriteAround => "WRITE_AROUND",
    WriteBehind => "WRITE_BEHIND",
});

policy_names!(LoadingMode {
    Sync => "SYNC",
    Async => "ASYNC",
});

policy_names!(EvictionPolicy {
    Lru => "LRU",
    Lfu => "LFU",
    Fifo => "FIFO",
});

// == Cache Config ==
/// Cache configuration parameters.
///
/// Constructed once and never mutated for the lifetime of a cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of live entries
    pub max_size: usize,
    /// Time to live in milliseconds; 0 disables expiry. Under
    /// `ExpirationStrategy::Absolute` this is the deadline in Unix milliseconds.
    pub ttl_ms: u64,
    /// Refresh-ahead period in milliseconds; 0 disables refresh
    pub refresh_ms: u64,
    pub expiration: ExpirationStrategy,
    pub write_policy: WritePolicy,
    pub loading_mode: LoadingMode,
    pub eviction_policy: EvictionPolicy,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `EMBER_MAX_SIZE` - Maximum cache entries (default: 1000)
    /// - `EMBER_TTL_MS` - TTL in milliseconds (default: 60000)
    /// - `EMBER_REFRESH_MS` - Refresh period in milliseconds (default: 30000)
    /// - `EMBER_EXPIRATION_STRATEGY` - `RELATIVE` or `ABSOLUTE` (default: RELATIVE)
    /// - `EMBER_WRITE_POLICY` - `WRITE_THROUGH`, `WRITE_BACK`, ... (default: WRITE_THROUGH)
    /// - `EMBER_LOADING_MODE` - `SYNC` or `ASYNC` (default: SYNC)
    /// - `EMBER_EVICTION_POLICY` - `LRU`, `LFU` or `FIFO` (default: LRU)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_size: env_or("EMBER_MAX_SIZE", defaults.max_size),
            ttl_ms: env_or("EMBER_TTL_MS", defaults.ttl_ms),
            refresh_ms: env_or("EMBER_REFRESH_MS", defaults.refresh_ms),
            expiration: env_or("EMBER_EXPIRATION_STRATEGY", defaults.expiration),
            write_policy: env_or("EMBER_WRITE_POLICY", defaults.write_policy),
            loading_mode: env_or("EMBER_LOADING_MODE", defaults.loading_mode),
            eviction_policy: env_or("EMBER_EVICTION_POLICY", defaults.eviction_policy),
        }
    }

    // == Validate ==
    /// Rejects configurations the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(CacheError::InvalidConfig(
                "max_size must be greater than 0".to_string(),
            ));
        }

        match self.write_policy {
            WritePolicy::WriteThrough | WritePolicy::WriteBack => {}
            other @ (WritePolicy::WriteAround | WritePolicy::WriteBehind) => {
                return Err(CacheError::UnsupportedWritePolicy(other));
            }
        }

        match self.eviction_policy {
            EvictionPolicy::Lru => Ok(()),
            other @ (EvictionPolicy::Lfu | EvictionPolicy::Fifo) => {
                Err(CacheError::UnsupportedEvictionPolicy(other))
            }
        }
    }

    /// Time to live, or `None` when entries never expire.
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_ms > 0).then(|| Duration::from_millis(self.ttl_ms))
    }

    /// Refresh period, or `None` when refresh-ahead is disabled.
    pub fn refresh_period(&self) -> Option<Duration> {
        (self.refresh_ms > 0).then(|| Duration::from_millis(self.refresh_ms))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl_ms: 60_000,
            refresh_ms: 30_000,
            expiration: ExpirationStrategy::Relative,
            write_policy: WritePolicy::WriteThrough,
            loading_mode: LoadingMode::Sync,
            eviction_policy: EvictionPolicy::Lru,
        }
    }
}

fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|err| {
            warn!("Ignoring {}={:?}: {}", name, raw, err);
            default
        }),
        Err(_) => default,
    }
}
