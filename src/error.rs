//! Error types for loader and cache store operations
//!
//! Every error here is `Clone`: a single batch outcome has to be delivered to
//! every request that took part in the batch.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A failure attached to a single key.
///
/// Returned by a batch function either for one position of its result
/// (per-key failure) or for the whole call (batch-wide failure). Faults are
/// never written to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Human readable description
    pub message: String,

    /// Optional machine readable code (e.g. `not_found`)
    pub code: Option<String>,
}

impl Fault {
    /// Create a fault with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Attach a machine readable code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for Fault {}

impl From<String> for Fault {
    fn from(s: String) -> Self {
        Fault::new(s)
    }
}

impl From<&str> for Fault {
    fn from(s: &str) -> Self {
        Fault::new(s)
    }
}

/// Errors raised by a [`CacheStore`](crate::store::CacheStore) implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend failure (connection, I/O, remote error)
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// The store cannot make room for a new record
    #[error("Cache capacity exceeded: {max_entries} entries")]
    CapacityExceeded { max_entries: usize },

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Main error type for loader operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    /// The batch function rejected the whole call
    #[error("Batch load failed: {0}")]
    BatchFailed(Fault),

    /// The batch function broke the one-result-per-key contract
    #[error("Batch function returned {actual} results for {expected} keys")]
    LengthMismatch { expected: usize, actual: usize },

    /// The batch function reported a failure for this key only
    #[error("Load failed: {0}")]
    Fault(Fault),

    /// Reading the cache failed, so cached and uncached keys could not be told apart
    #[error("Cache read failed: {0}")]
    CacheRead(StoreError),

    /// The value was resolved but writing it back to the cache failed
    #[error("Cache write-back failed: {0}")]
    CacheWrite(StoreError),

    /// A store call made by prime/clear failed
    #[error("Cache store error: {0}")]
    Store(#[from] StoreError),

    /// Internal invariant violated; indicates a bug, not an external failure
    #[error("Internal invariant violated: {0}")]
    Invariant(String),

    /// The batch task ended without delivering a result
    #[error("Batch was cancelled before a result was delivered")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LoaderError {
    /// The per-key fault carried by this error, if any
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            LoaderError::Fault(fault) | LoaderError::BatchFailed(fault) => Some(fault),
            _ => None,
        }
    }

    /// Whether this error affects an entire batch rather than one key
    pub fn is_batch_wide(&self) -> bool {
        matches!(
            self,
            LoaderError::BatchFailed(_)
                | LoaderError::LengthMismatch { .. }
                | LoaderError::CacheRead(_)
                | LoaderError::Cancelled
        )
    }
}

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;
