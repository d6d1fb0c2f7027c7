//! Query Engine for PromQL-style expressions
//!
//! This module provides the batched pull-execution core:
//! - Operators exchanging batches of step vectors through a pool
//! - A function operator binding kernels to vector and scalar inputs
//! - Series selectors resolving matchers once and lending shards
//! - Parallel execution of one operator tree per shard
//!
//! # Architecture
//!
//! ```text
//! Expr
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Plan      │  Bind functions, share selectors, one tree per shard
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Execute    │  Pull batches, shards in parallel
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Format     │  JSON, CSV
//! └─────────────┘
//! ```

pub mod ast;
pub mod error;
pub mod executor;
pub mod functions;
pub mod integration;
pub mod model;
pub mod operators;
pub mod planner;
pub mod result;
pub mod selector;

// Re-export main types
pub use ast::{Call, Expr, MatrixSelector, ValueType, VectorSelector};
pub use error::{QueryError, QueryErrorKind};
pub use executor::{ExecutionContext, ExecutionStats, ExecutorConfig, QueryExecutor, QueryOptions};
pub use functions::{FunctionArgs, FunctionCall, FunctionRegistry};
pub use integration::QueryEngine;
pub use model::{PoolStats, StepVector, VectorPool};
pub use operators::{explain, VectorOperator};
pub use planner::Planner;
pub use result::{QueryResult, ResultFormat, ResultMetadata, ResultSeries};
pub use selector::{shard_bounds, SeriesSelector, ShardView, VectorScan};
