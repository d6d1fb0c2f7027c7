//! promql-exec - Batched pull-operator execution core for PromQL-style queries
//!
//! This library evaluates parsed query expressions against a time-series
//! storage backend:
//! - Operator trees that pull fixed-size batches of step vectors
//! - A function library with Prometheus-compatible numeric kernels
//! - One-time series resolution shared by parallel shards
//! - Pooled batch allocation and memoized series iterators
//!
//! # Example
//!
//! ```rust
//! use promql_exec::query::{ast::Expr, QueryEngine};
//! use promql_exec::storage::InMemoryStorage;
//! use promql_exec::types::{LabelMatcher, Labels, Point};
//! use std::sync::Arc;
//!
//! let storage = InMemoryStorage::new();
//! storage.add_series(
//!     Labels::from_pairs([("__name__", "http_requests_total"), ("job", "api")]),
//!     [Point::new(0, 0.0), Point::new(60_000, 120.0)],
//! );
//!
//! let engine = QueryEngine::new(Arc::new(storage));
//! let expr = Expr::call(
//!     "rate",
//!     vec![Expr::matrix(vec![LabelMatcher::metric("http_requests_total")], 60_000)],
//! );
//! let result = engine.instant_query(&expr, 60_000).unwrap();
//! assert_eq!(result.series[0].points[0].v, 2.0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod storage;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Query engine: operators, function library, series selection and execution
pub mod query;

// Re-export main types
pub use config::Config;
pub use error::{Error, Result};
pub use query::{QueryEngine, QueryError, QueryResult};
pub use types::{LabelMatcher, Labels, Point, TimeRange};
