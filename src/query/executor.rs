//! Query Executor - drives operator trees to completion
//!
//! The executor pulls batches from the root of an operator tree until it is
//! exhausted and collects the samples into a [`QueryResult`]:
//!
//! ```text
//! ┌─────────────────┐
//! │  QueryResult    │  ← samples grouped by the root's series
//! └────────┬────────┘
//!          │ pull batches, recycle into root pool
//! ┌────────▼────────┐
//! │ FunctionOperator│
//! └────────┬────────┘
//!          │ pull batches
//! ┌────────▼────────┐
//! │  Leaf operator  │  ← reads one shard of a SeriesSelector
//! └─────────────────┘
//! ```
//!
//! # Sharded execution
//!
//! [`QueryExecutor::execute_sharded`] builds one tree per shard and drains
//! them on the rayon pool. Shards share their `SeriesSelector`s, so storage
//! is queried once per selector no matter how many shards run. Shard results
//! are concatenated in shard order.

use crate::config::Config;
use crate::metrics;
use crate::query::ast::Expr;
use crate::query::error::{QueryError, QueryErrorKind};
use crate::query::operators::VectorOperator;
use crate::query::planner::Planner;
use crate::query::result::{QueryResult, ResultSeries};
use crate::query::selector::DEFAULT_MEMO_WINDOW_MS;
use crate::types::{Labels, Point};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// ============================================================================
// Executor Configuration
// ============================================================================

/// Configuration for query execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum steps per batch (default: 10)
    pub steps_per_batch: usize,

    /// Instant-selector look-back in milliseconds (default: 5 minutes)
    pub lookback_delta_ms: i64,

    /// Memoized iterator history in milliseconds (default: 5 minutes)
    pub memo_window_ms: i64,

    /// Query timeout duration (default: 2 minutes)
    pub timeout: Duration,

    /// Shards per query for `execute_query` (default: num_cpus)
    pub num_shards: usize,

    /// Maximum number of samples in a result (default: 50_000_000)
    pub max_result_samples: usize,

    /// Record Prometheus metrics for executed queries (default: true)
    pub metrics_enabled: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            steps_per_batch: 10,
            lookback_delta_ms: 5 * 60 * 1000,
            memo_window_ms: DEFAULT_MEMO_WINDOW_MS,
            timeout: Duration::from_secs(120),
            num_shards: num_cpus::get(),
            max_result_samples: 50_000_000,
            metrics_enabled: true,
        }
    }
}

impl ExecutorConfig {
    /// Create a new executor config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum steps per batch
    pub fn with_steps_per_batch(mut self, steps: usize) -> Self {
        self.steps_per_batch = steps.max(1);
        self
    }

    /// Set instant-selector look-back
    pub fn with_lookback_delta(mut self, lookback_ms: i64) -> Self {
        self.lookback_delta_ms = lookback_ms;
        self
    }

    /// Set query timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the shard count used by `execute_query`
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.num_shards = shards.max(1);
        self
    }

    /// Set maximum result samples
    pub fn with_max_result_samples(mut self, samples: usize) -> Self {
        self.max_result_samples = samples;
        self
    }

    /// Disable metric recording
    pub fn without_metrics(mut self) -> Self {
        self.metrics_enabled = false;
        self
    }
}

impl From<&Config> for ExecutorConfig {
    fn from(config: &Config) -> Self {
        let exec = &config.execution;
        Self {
            steps_per_batch: exec.steps_per_batch.max(1),
            lookback_delta_ms: exec.lookback_delta_ms,
            memo_window_ms: exec.memo_window_ms,
            timeout: Duration::from_millis(exec.timeout_ms),
            num_shards: exec.num_shards.max(1),
            max_result_samples: exec.max_result_samples,
            metrics_enabled: config.monitoring.metrics_enabled,
        }
    }
}

// ============================================================================
// Query Options
// ============================================================================

/// Evaluation timestamps and look-back settings of one query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// First evaluation timestamp (ms)
    pub start: i64,
    /// Last evaluation timestamp (ms, inclusive)
    pub end: i64,
    /// Distance between evaluation timestamps (ms); zero for instant queries
    pub step: i64,
    /// Instant-selector look-back (ms)
    pub lookback_delta: i64,
    /// Maximum steps per batch
    pub steps_per_batch: usize,
}

impl QueryOptions {
    /// Range query evaluated at `start, start + step, ..., <= end`
    pub fn range(start: i64, end: i64, step: i64) -> Result<Self, QueryError> {
        if end < start {
            return Err(QueryError::construction(format!(
                "end {} before start {}",
                end, start
            )));
        }
        if step <= 0 {
            return Err(QueryError::construction(format!(
                "step must be positive, got {}",
                step
            )));
        }
        Ok(Self {
            start,
            end,
            step,
            ..Self::instant(start)
        })
    }

    /// Instant query evaluated at `t` only
    pub fn instant(t: i64) -> Self {
        let defaults = ExecutorConfig::default();
        Self {
            start: t,
            end: t,
            step: 0,
            lookback_delta: defaults.lookback_delta_ms,
            steps_per_batch: defaults.steps_per_batch,
        }
    }

    /// Take look-back and batch size from an executor config
    pub fn with_config(mut self, config: &ExecutorConfig) -> Self {
        self.lookback_delta = config.lookback_delta_ms;
        self.steps_per_batch = config.steps_per_batch.max(1);
        self
    }

    /// Set the instant-selector look-back
    pub fn with_lookback_delta(mut self, lookback_ms: i64) -> Self {
        self.lookback_delta = lookback_ms;
        self
    }

    /// Set maximum steps per batch
    pub fn with_steps_per_batch(mut self, steps: usize) -> Self {
        self.steps_per_batch = steps.max(1);
        self
    }

    /// Number of evaluation timestamps
    pub fn num_steps(&self) -> usize {
        if self.step == 0 {
            1
        } else {
            ((self.end - self.start) / self.step) as usize + 1
        }
    }

    /// Whether this is an instant query
    pub fn is_instant(&self) -> bool {
        self.start == self.end
    }
}

// ============================================================================
// Execution Context
// ============================================================================

/// Cancellation and deadline state shared by every operator of a query
///
/// Clones share the cancellation flag, so a clone handed to another thread
/// can cancel the query.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Query start time for timeout checking
    start_time: Instant,

    /// Timeout duration
    timeout: Duration,

    /// Set once the query is cancelled
    cancelled: Arc<AtomicBool>,
}

impl ExecutionContext {
    /// Create a new execution context from config
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            start_time: Instant::now(),
            timeout: config.timeout,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cancel execution; observed by every clone
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            debug!(elapsed_ms = self.elapsed().as_millis() as u64, "Query cancelled");
        }
    }

    /// Whether the query was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Check if query has timed out
    pub fn is_timed_out(&self) -> bool {
        self.start_time.elapsed() > self.timeout
    }

    /// Time since the context was created
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get remaining time before timeout
    pub fn remaining_time(&self) -> Duration {
        self.timeout.saturating_sub(self.start_time.elapsed())
    }

    /// Fail with `Cancelled` or `Timeout` if the query must stop
    pub fn check(&self) -> Result<(), QueryError> {
        if self.is_cancelled() {
            return Err(QueryError::cancelled("query cancelled"));
        }
        if self.is_timed_out() {
            return Err(QueryError::timeout(format!(
                "query exceeded timeout of {:?}",
                self.timeout
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Query Executor
// ============================================================================

/// Drains operator trees into query results
pub struct QueryExecutor {
    /// Executor configuration
    config: ExecutorConfig,

    /// Execution statistics for monitoring
    stats: ExecutionStats,
}

/// Output of draining one operator tree
struct Drained {
    result: QueryResult,
    batches: u64,
}

impl QueryExecutor {
    /// Create a new query executor with default configuration
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default())
    }

    /// Create a query executor with custom configuration
    pub fn with_config(config: ExecutorConfig) -> Self {
        Self {
            config,
            stats: ExecutionStats::default(),
        }
    }

    /// Get executor configuration
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Get current execution statistics
    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    /// Reset execution statistics
    pub fn reset_stats(&mut self) {
        self.stats = ExecutionStats::default();
    }

    /// New execution context using this executor's timeout
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::new(&self.config)
    }

    /// Execute an operator tree and collect results
    ///
    /// Batches are recycled into the root's pool once their samples are
    /// copied out. Cancellation and timeout are checked between batches.
    ///
    /// # Errors
    ///
    /// Any operator error, `Cancelled`/`Timeout` from the context, or
    /// `ResourceLimit` once the result exceeds `max_result_samples`.
    pub fn execute_operator(
        &mut self,
        operator: Box<dyn VectorOperator>,
        ctx: &ExecutionContext,
    ) -> Result<QueryResult, QueryError> {
        let start = Instant::now();
        let outcome = drain(operator, ctx, self.config.max_result_samples);
        self.finish("single", start, outcome)
    }

    /// Build and drain one operator tree per shard in parallel
    ///
    /// `build(shard, num_shards)` is called once per shard on the rayon pool.
    /// An error in any shard cancels `ctx`, which stops the other shards at
    /// their next batch boundary. The first error that is not a cancellation
    /// is returned; results are concatenated in shard order.
    pub fn execute_sharded<F>(
        &mut self,
        num_shards: usize,
        ctx: &ExecutionContext,
        build: F,
    ) -> Result<QueryResult, QueryError>
    where
        F: Fn(usize, usize) -> Result<Box<dyn VectorOperator>, QueryError> + Sync,
    {
        let start = Instant::now();
        let num_shards = num_shards.max(1);
        let limit = self.config.max_result_samples;

        let shards: Vec<Result<Drained, QueryError>> = (0..num_shards)
            .into_par_iter()
            .map(|shard| {
                let outcome = build(shard, num_shards).and_then(|op| drain(op, ctx, limit));
                if outcome.is_err() {
                    ctx.cancel();
                }
                outcome
            })
            .collect();

        let outcome = merge_shards(shards, limit);
        self.finish("sharded", start, outcome)
    }

    /// Plan `expr` with `planner` and execute it over the configured shards
    ///
    /// Expressions without any selector have nothing to shard and run as a
    /// single tree.
    pub fn execute_query(
        &mut self,
        planner: &Planner,
        expr: &Expr,
        ctx: &ExecutionContext,
    ) -> Result<QueryResult, QueryError> {
        let num_shards = if expr.has_selector() {
            self.config.num_shards
        } else {
            1
        };
        self.execute_sharded(num_shards, ctx, |shard, n| planner.build(expr, shard, n))
    }

    fn finish(
        &mut self,
        mode: &str,
        start: Instant,
        outcome: Result<Drained, QueryError>,
    ) -> Result<QueryResult, QueryError> {
        let duration = start.elapsed();
        self.stats.total_queries += 1;
        self.stats.total_execution_time += duration;

        match outcome {
            Ok(drained) => {
                self.stats.batches += drained.batches;
                self.stats.samples_returned += drained.result.sample_count() as u64;
                self.stats.series_returned += drained.result.series.len() as u64;
                if self.config.metrics_enabled {
                    metrics::record_query(mode, duration.as_secs_f64());
                }
                debug!(
                    mode,
                    batches = drained.batches,
                    series = drained.result.series.len(),
                    samples = drained.result.sample_count(),
                    elapsed_us = duration.as_micros() as u64,
                    "Query completed"
                );
                Ok(drained
                    .result
                    .with_batches(drained.batches)
                    .with_execution_time(duration))
            }
            Err(err) => {
                self.stats.failed_queries += 1;
                if self.config.metrics_enabled {
                    metrics::record_query_error(err.kind);
                }
                if err.kind == QueryErrorKind::Cancelled {
                    debug!(mode, "Query stopped by cancellation");
                } else {
                    warn!(mode, error = %err, "Query failed");
                }
                Err(err)
            }
        }
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull every batch from `operator` and group the samples by series
///
/// Samples of an operator that reports no series at all (a scalar root) are
/// collected under one unlabelled series.
fn drain(
    mut operator: Box<dyn VectorOperator>,
    ctx: &ExecutionContext,
    max_samples: usize,
) -> Result<Drained, QueryError> {
    ctx.check()?;
    let series = operator.series(ctx)?;
    let pool = operator.pool();

    let mut points: Vec<Vec<Point>> = vec![Vec::new(); series.len()];
    let mut unlabelled: Vec<Point> = Vec::new();
    let mut samples = 0usize;
    let mut batches = 0u64;

    while let Some(batch) = operator.next(ctx)? {
        if batch.is_empty() {
            pool.put_vectors(batch);
            break;
        }
        batches += 1;

        for step in &batch {
            for (&id, &v) in step.sample_ids.iter().zip(&step.samples) {
                match points.get_mut(id as usize) {
                    Some(out) => out.push(Point::new(step.t, v)),
                    None if series.is_empty() => unlabelled.push(Point::new(step.t, v)),
                    None => {
                        return Err(QueryError::internal(format!(
                            "sample id {} outside of {} series",
                            id,
                            series.len()
                        )))
                    }
                }
            }
            samples += step.len();
        }
        pool.put_vectors(batch);

        if samples > max_samples {
            return Err(QueryError::resource_limit(format!(
                "query returned more than {} samples",
                max_samples
            )));
        }
        ctx.check()?;
    }

    let mut out: Vec<ResultSeries> = series
        .iter()
        .zip(points)
        .map(|(labels, points)| ResultSeries {
            labels: labels.clone(),
            points,
        })
        .collect();
    if !unlabelled.is_empty() {
        out.push(ResultSeries {
            labels: Labels::empty(),
            points: unlabelled,
        });
    }

    Ok(Drained {
        result: QueryResult::from_series(out),
        batches,
    })
}

fn merge_shards(
    shards: Vec<Result<Drained, QueryError>>,
    max_samples: usize,
) -> Result<Drained, QueryError> {
    let mut first_err: Option<QueryError> = None;
    let mut merged = Drained {
        result: QueryResult::empty(),
        batches: 0,
    };

    for shard in shards {
        match shard {
            Ok(drained) => {
                merged.batches += drained.batches;
                merged.result.extend(drained.result);
            }
            Err(err) => {
                // Cancellations are usually fallout from another shard's failure
                let replace = match &first_err {
                    None => true,
                    Some(prev) => {
                        prev.kind == QueryErrorKind::Cancelled
                            && err.kind != QueryErrorKind::Cancelled
                    }
                };
                if replace {
                    first_err = Some(err);
                }
            }
        }
    }

    if let Some(err) = first_err {
        return Err(err);
    }
    if merged.result.sample_count() > max_samples {
        return Err(QueryError::resource_limit(format!(
            "query returned more than {} samples",
            max_samples
        )));
    }
    Ok(merged)
}

// ============================================================================
// Execution Statistics
// ============================================================================

/// Statistics collected across executed queries
#[derive(Debug, Clone, Default)]
pub struct ExecutionStats {
    /// Total number of queries executed
    pub total_queries: u64,

    /// Queries that ended in an error
    pub failed_queries: u64,

    /// Total execution time across all queries
    pub total_execution_time: Duration,

    /// Batches pulled from root operators
    pub batches: u64,

    /// Samples returned
    pub samples_returned: u64,

    /// Series returned
    pub series_returned: u64,
}

impl ExecutionStats {
    /// Calculate average query latency
    pub fn avg_query_latency(&self) -> Duration {
        if self.total_queries == 0 {
            Duration::ZERO
        } else {
            self.total_execution_time / self.total_queries.min(u32::MAX as u64) as u32
        }
    }

    /// Fraction of queries that failed (0.0 to 1.0)
    pub fn error_ratio(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.failed_queries as f64 / self.total_queries as f64
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
