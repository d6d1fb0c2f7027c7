//! Range-vector selector operator
//!
//! Leaf operator evaluating a range function, e.g. `rate(x[5m])`, over one
//! shard of a [`SeriesSelector`]. For every step and series the bound kernel
//! receives the full window `[t - range - offset, t - offset]`, read through
//! the series' memoized iterator so overlapping windows of consecutive steps
//! are served from its buffer.

use super::{StepCursor, VectorOperator};
use crate::metrics;
use crate::query::error::QueryError;
use crate::query::executor::{ExecutionContext, QueryOptions};
use crate::query::functions::{FunctionArgs, FunctionCall};
use crate::query::model::{StepVector, VectorPool};
use crate::query::selector::{SeriesSelector, ShardView};
use crate::types::{Labels, Point};
use std::sync::Arc;
use tracing::debug;

/// Applies a range function to each series of a shard at every step
pub struct MatrixSelectorOperator {
    selector: Arc<SeriesSelector>,
    function: String,
    call: FunctionCall,
    range: i64,
    offset: i64,
    shard: usize,
    num_shards: usize,
    cursor: StepCursor,
    pool: Arc<VectorPool>,
    scans: Option<(ShardView, Arc<[Labels]>)>,
    window: Vec<Point>,
}

impl MatrixSelectorOperator {
    /// Create the operator for shard `shard` of `num_shards`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        selector: Arc<SeriesSelector>,
        function: impl Into<String>,
        call: FunctionCall,
        options: &QueryOptions,
        range: i64,
        offset: i64,
        shard: usize,
        num_shards: usize,
    ) -> Self {
        Self {
            selector,
            function: function.into(),
            call,
            range,
            offset,
            shard,
            num_shards,
            cursor: StepCursor::new(options.start, options.end, options.step),
            pool: Arc::new(VectorPool::new(options.steps_per_batch)),
            scans: None,
            window: Vec::new(),
        }
    }

    fn load(&mut self, ctx: &ExecutionContext) -> Result<&(ShardView, Arc<[Labels]>), QueryError> {
        if self.scans.is_none() {
            let view = self.selector.series(ctx, self.shard, self.num_shards)?;
            let keep_name = self.function == "last_over_time";
            let labels: Arc<[Labels]> = view
                .iter()
                .map(|s| {
                    if keep_name {
                        s.labels().clone()
                    } else {
                        s.labels().drop_metric_name()
                    }
                })
                .collect();
            self.pool.set_step_size(view.len());
            debug!(
                function = %self.function,
                shard = self.shard,
                num_shards = self.num_shards,
                series = view.len(),
                "Matrix selector shard loaded"
            );
            self.scans = Some((view, labels));
        }
        self.scans
            .as_ref()
            .ok_or_else(|| QueryError::internal("matrix selector series not loaded"))
    }
}

impl VectorOperator for MatrixSelectorOperator {
    fn describe(&self) -> (String, Vec<&dyn VectorOperator>) {
        let matchers: Vec<String> =
            self.selector.matchers().iter().map(|m| m.to_string()).collect();
        (
            format!(
                "[matrix_selector] {}({{{}}}[{}ms]) offset={}ms shard={}/{}",
                self.function,
                matchers.join(", "),
                self.range,
                self.offset,
                self.shard,
                self.num_shards
            ),
            Vec::new(),
        )
    }

    fn series(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>, QueryError> {
        Ok(self.load(ctx)?.1.clone())
    }

    fn pool(&self) -> Arc<VectorPool> {
        self.pool.clone()
    }

    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Vec<StepVector>>, QueryError> {
        if self.cursor.is_exhausted() {
            return Ok(None);
        }
        ctx.check()?;
        let view = self.load(ctx)?.0.clone();

        let mut batch = self.pool.get_vectors();
        let mut calls = 0usize;
        for t in self.cursor.next_batch(self.pool.steps_per_batch()) {
            let mut step = self.pool.get_step_vector(t);
            let maxt = t - self.offset;
            let mint = maxt - self.range;
            for (i, scan) in view.iter().enumerate() {
                self.window.clear();
                scan.samples().range_into(mint, maxt, &mut self.window)?;

                let result = (self.call)(&FunctionArgs {
                    labels: scan.labels(),
                    points: &self.window,
                    step_time: t,
                    select_range: self.range,
                    scalar_points: &[],
                    offset: self.offset,
                });
                calls += 1;
                if !result.is_invalid() {
                    step.push(i as u64, result.v);
                }
            }
            batch.push(step);
        }
        metrics::record_function_calls(&self.function, calls);
        metrics::record_batch("matrix_selector");
        Ok(Some(batch))
    }
}
