//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

use crate::config::{EvictionPolicy, WritePolicy};

// == Cache Error Enum ==
/// Unified error type for the cache engine.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The configured write policy has no implementation
    #[error("Unsupported write policy: {0}")]
    UnsupportedWritePolicy(WritePolicy),

    /// The configured eviction policy has no implementation
    #[error("Unsupported eviction policy: {0}")]
    UnsupportedEvictionPolicy(EvictionPolicy),

    /// A configuration value is out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The external backing store failed a load, save or remove
    #[error("Backing store failure: {0}")]
    BackingStore(#[source] anyhow::Error),

    /// The scheduler runtime or the loader thread could not be started
    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

impl CacheError {
    /// Returns true for the configuration class of errors.
    ///
    /// These are fatal to the operation that raised them and never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CacheError::UnsupportedWritePolicy(_)
                | CacheError::UnsupportedEvictionPolicy(_)
                | CacheError::InvalidConfig(_)
        )
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_classified() {
        assert!(CacheError::UnsupportedWritePolicy(WritePolicy::WriteAround).is_configuration());
        assert!(CacheError::UnsupportedEvictionPolicy(EvictionPolicy::Lfu).is_configuration());
        assert!(CacheError::InvalidConfig("max_size".to_string()).is_configuration());
        assert!(!CacheError::BackingStore(anyhow::anyhow!("disk gone")).is_configuration());
    }

    #[test]
    fn test_error_messages_name_the_policy() {
        let err = CacheError::UnsupportedWritePolicy(WritePolicy::WriteBehind);
        assert_eq!(err.to_string(), "Unsupported write policy: WRITE_BEHIND");

        let err = CacheError::UnsupportedEvictionPolicy(EvictionPolicy::Fifo);
        assert_eq!(err.to_string(), "Unsupported eviction policy: FIFO");
    }

    #[test]
    fn test_backing_store_error_keeps_source() {
        use std::error::Error as _;

        let err = CacheError::BackingStore(anyhow::anyhow!("connection reset"));
        assert!(err.to_string().contains("connection reset"));
        assert!(err.source().is_some());
    }
}
