//! Query Integration Module
//!
//! Bridges the query engine with a storage backend:
//!
//! ```text
//! Expr
//!   │
//!   ├─► Planner ─► one operator tree per shard
//!   │                    │
//!   │                    └─► SeriesSelector ─► Queryable (once per selector)
//!   │
//!   └─► QueryExecutor ─► QueryResult
//! ```

use crate::config::Config;
use crate::query::ast::Expr;
use crate::query::error::QueryError;
use crate::query::executor::{ExecutionContext, ExecutorConfig, QueryExecutor, QueryOptions};
use crate::query::functions::FunctionRegistry;
use crate::query::planner::Planner;
use crate::query::result::QueryResult;
use crate::storage::Queryable;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// Entry point for evaluating expressions against a storage backend
///
/// Each query gets a fresh planner (and therefore fresh series selectors);
/// execution statistics accumulate across queries. Queries on one engine run
/// one at a time; the shards of a query run in parallel.
pub struct QueryEngine {
    /// Storage backend
    storage: Arc<dyn Queryable>,

    /// Function kernels available to queries
    registry: FunctionRegistry,

    /// Executor, shared by all queries for statistics
    executor: Mutex<QueryExecutor>,
}

impl QueryEngine {
    /// Create a query engine with the default executor configuration
    pub fn new(storage: Arc<dyn Queryable>) -> Self {
        Self::with_config(storage, ExecutorConfig::default())
    }

    /// Create a query engine with an explicit executor configuration
    pub fn with_config(storage: Arc<dyn Queryable>, config: ExecutorConfig) -> Self {
        Self {
            storage,
            registry: FunctionRegistry::global().clone(),
            executor: Mutex::new(QueryExecutor::with_config(config)),
        }
    }

    /// Create a query engine from a loaded configuration file
    pub fn from_config(storage: Arc<dyn Queryable>, config: &Config) -> Self {
        info!(
            num_shards = config.execution.num_shards,
            steps_per_batch = config.execution.steps_per_batch,
            "Query engine configured"
        );
        Self::with_config(storage, ExecutorConfig::from(config))
    }

    /// Replace the function registry
    pub fn with_registry(mut self, registry: FunctionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Executor configuration
    pub fn config(&self) -> ExecutorConfig {
        self.executor.lock().config().clone()
    }

    /// New execution context; clone it to cancel the query from elsewhere
    pub fn context(&self) -> ExecutionContext {
        self.executor.lock().context()
    }

    /// Evaluate `expr` at `start, start + step, ..., <= end`
    pub fn range_query(
        &self,
        expr: &Expr,
        start: i64,
        end: i64,
        step: i64,
    ) -> Result<QueryResult, QueryError> {
        let options = QueryOptions::range(start, end, step)?;
        self.query(expr, options, &self.context())
    }

    /// Evaluate `expr` at `t`
    pub fn instant_query(&self, expr: &Expr, t: i64) -> Result<QueryResult, QueryError> {
        self.query(expr, QueryOptions::instant(t), &self.context())
    }

    /// Evaluate `expr` with explicit options under `ctx`
    pub fn query(
        &self,
        expr: &Expr,
        options: QueryOptions,
        ctx: &ExecutionContext,
    ) -> Result<QueryResult, QueryError> {
        let mut executor = self.executor.lock();
        let config = executor.config().clone();
        let planner = Planner::new(self.storage.clone(), options.with_config(&config))
            .with_registry(self.registry.clone())
            .with_memo_window(config.memo_window_ms);
        executor.execute_query(&planner, expr, ctx)
    }

    /// Total queries executed and failed so far
    pub fn query_counts(&self) -> (u64, u64) {
        let executor = self.executor.lock();
        let stats = executor.stats();
        (stats.total_queries, stats.failed_queries)
    }
}
