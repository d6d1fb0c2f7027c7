//! Query error types
//!
//! Provides structured error handling for operator-tree construction,
//! function binding, series resolution and batch execution.

use crate::error::StorageError;
use std::fmt;
use std::sync::Arc;

/// Query error with context
///
/// Cloning is cheap: the optional source is shared, which lets a cached
/// failure be handed to every caller that waited on it.
#[derive(Debug, Clone)]
pub struct QueryError {
    /// Error kind for programmatic handling
    pub kind: QueryErrorKind,
    /// Human-readable message
    pub message: String,
    /// Optional source error
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl QueryError {
    /// Create a new query error
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Add source error for error chaining
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Create a construction error (malformed argument shape)
    pub fn construction(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Construction, message)
    }

    /// Create a "known to the language, not implemented here" error
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::NotImplemented, message)
    }

    /// Create an "unknown to the language" error
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::NotSupported, message)
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Storage, message)
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Cancelled, message)
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Timeout, message)
    }

    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ExecutionError, message)
    }

    /// Create a resource limit error
    pub fn resource_limit(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ResourceLimit, message)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Internal, message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<StorageError> for QueryError {
    fn from(err: StorageError) -> Self {
        QueryError::storage(err.to_string()).with_source(err)
    }
}

/// Categories of query errors for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryErrorKind {
    /// Malformed function-argument shape detected while building the tree
    Construction,
    /// Function or argument type is part of the language but not implemented
    NotImplemented,
    /// Function name is unknown to the language
    NotSupported,
    /// Error propagated from the storage layer
    Storage,
    /// Query was cancelled by the caller
    Cancelled,
    /// Query exceeded its time limit
    Timeout,
    /// Query execution failed
    ExecutionError,
    /// Query exceeded resource limits (result size)
    ResourceLimit,
    /// Internal error (bug, unexpected state)
    Internal,
}

impl QueryErrorKind {
    /// Stable lowercase name, used as a metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryErrorKind::Construction => "construction",
            QueryErrorKind::NotImplemented => "not_implemented",
            QueryErrorKind::NotSupported => "not_supported",
            QueryErrorKind::Storage => "storage",
            QueryErrorKind::Cancelled => "cancelled",
            QueryErrorKind::Timeout => "timeout",
            QueryErrorKind::ExecutionError => "execution",
            QueryErrorKind::ResourceLimit => "resource_limit",
            QueryErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryErrorKind::Construction => write!(f, "ConstructionError"),
            QueryErrorKind::NotImplemented => write!(f, "NotImplemented"),
            QueryErrorKind::NotSupported => write!(f, "NotSupported"),
            QueryErrorKind::Storage => write!(f, "StorageError"),
            QueryErrorKind::Cancelled => write!(f, "Cancelled"),
            QueryErrorKind::Timeout => write!(f, "Timeout"),
            QueryErrorKind::ExecutionError => write!(f, "ExecutionError"),
            QueryErrorKind::ResourceLimit => write!(f, "ResourceLimit"),
            QueryErrorKind::Internal => write!(f, "Internal"),
        }
    }
}
