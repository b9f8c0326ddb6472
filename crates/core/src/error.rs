//! Error types for Chronicle
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Absence (a missing chronology, an unknown nid) is never an error: lookups
//! return `Option`. Errors fall into three groups:
//!
//! - consistency violations, fatal and never retried
//! - backing-store failures, surfaced as [`Error::DataAccess`]
//! - malformed bytes, surfaced as [`Error::Corruption`] or [`Error::Serialization`]

use std::io;
use thiserror::Error;

/// Result type alias for Chronicle operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the Chronicle store
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// A store invariant would be broken by this operation
    ///
    /// Raised for nid reassignment, assemblage type changes and cyclic
    /// path ancestry. Callers must not retry.
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    /// The backing store could not be read or written
    #[error("Data access error: {0}")]
    DataAccess(String),

    /// Invalid caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// One or more write listeners failed after a committed write
    #[error("{} write listener(s) failed: {}", failures.len(), failures.join("; "))]
    ListenerFailures {
        /// One message per failing listener, in registration order
        failures: Vec<String>,
    },

    /// Background queue is full or shut down
    #[error("Background scheduler rejected task: {0}")]
    Backpressure(String),
}

impl Error {
    /// Build a consistency violation
    pub fn consistency(msg: impl Into<String>) -> Self {
        Error::ConsistencyViolation(msg.into())
    }

    /// Build a data access error
    pub fn data_access(msg: impl Into<String>) -> Self {
        Error::DataAccess(msg.into())
    }

    /// Build an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Whether this error signals a broken store invariant
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ConsistencyViolation(_) | Error::Corruption(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}
