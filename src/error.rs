//! Error types for the query engine

use crate::query::error::QueryError;
use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Query construction or execution error
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Label matcher could not be compiled
    #[error("Invalid matcher: {0}")]
    InvalidMatcher(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors raised by a storage backend behind the [`Queryable`](crate::storage::Queryable)
/// interface
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Opening a querier over the requested window failed
    #[error("Querier unavailable: {0}")]
    QuerierFailed(String),

    /// Selecting series by matchers failed
    #[error("Select failed: {0}")]
    SelectFailed(String),

    /// Reading samples of one series failed
    #[error("Iterator failed for series {series}: {message}")]
    IteratorFailed {
        /// Label set of the series being read
        series: String,
        /// Backend message
        message: String,
    },

    /// Querier was used after close
    #[error("Querier already closed")]
    Closed,
}

/// Validation errors
///
/// Error type for configuration and input validation
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Value is out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Field name being validated
        field: String,
        /// The invalid value
        value: String,
        /// Minimum allowed value
        min: String,
        /// Maximum allowed value
        max: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    Failed(String),
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Configuration(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
