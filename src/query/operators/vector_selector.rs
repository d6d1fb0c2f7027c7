//! Instant-vector selector operator
//!
//! Leaf operator over one shard of a [`SeriesSelector`]. At every step it
//! emits, for each series of the shard, the newest sample within the
//! look-back delta. Series without such a sample are skipped for that step.

use super::{StepCursor, VectorOperator};
use crate::metrics;
use crate::query::error::QueryError;
use crate::query::executor::{ExecutionContext, QueryOptions};
use crate::query::model::{StepVector, VectorPool};
use crate::query::selector::{SeriesSelector, ShardView};
use crate::types::Labels;
use std::sync::Arc;
use tracing::debug;

/// Reads the latest sample per series and step
pub struct VectorSelectorOperator {
    selector: Arc<SeriesSelector>,
    shard: usize,
    num_shards: usize,
    offset: i64,
    lookback_delta: i64,
    cursor: StepCursor,
    pool: Arc<VectorPool>,
    scans: Option<(ShardView, Arc<[Labels]>)>,
}

impl VectorSelectorOperator {
    /// Create the operator for shard `shard` of `num_shards`
    pub fn new(
        selector: Arc<SeriesSelector>,
        options: &QueryOptions,
        offset: i64,
        shard: usize,
        num_shards: usize,
    ) -> Self {
        Self {
            selector,
            shard,
            num_shards,
            offset,
            lookback_delta: options.lookback_delta,
            cursor: StepCursor::new(options.start, options.end, options.step),
            pool: Arc::new(VectorPool::new(options.steps_per_batch)),
            scans: None,
        }
    }

    fn load(&mut self, ctx: &ExecutionContext) -> Result<&(ShardView, Arc<[Labels]>), QueryError> {
        if self.scans.is_none() {
            let view = self.selector.series(ctx, self.shard, self.num_shards)?;
            let labels: Arc<[Labels]> = view.iter().map(|s| s.labels().clone()).collect();
            self.pool.set_step_size(view.len());
            debug!(
                shard = self.shard,
                num_shards = self.num_shards,
                series = view.len(),
                "Vector selector shard loaded"
            );
            self.scans = Some((view, labels));
        }
        // Populated above
        self.scans
            .as_ref()
            .ok_or_else(|| QueryError::internal("vector selector series not loaded"))
    }
}

impl VectorOperator for VectorSelectorOperator {
    fn describe(&self) -> (String, Vec<&dyn VectorOperator>) {
        let matchers: Vec<String> =
            self.selector.matchers().iter().map(|m| m.to_string()).collect();
        (
            format!(
                "[vector_selector] {{{}}} offset={}ms shard={}/{}",
                matchers.join(", "),
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
        for t in self.cursor.next_batch(self.pool.steps_per_batch()) {
            let mut step = self.pool.get_step_vector(t);
            let ts = t - self.offset;
            for (i, scan) in view.iter().enumerate() {
                if let Some(p) = scan.samples().latest(ts, self.lookback_delta)? {
                    step.push(i as u64, p.v);
                }
            }
            batch.push(step);
        }
        metrics::record_batch("vector_selector");
        Ok(Some(batch))
    }
}
