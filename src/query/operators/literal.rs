//! Number literal operator
//!
//! Scalar leaf: one sample with id 0 and the literal's value at every step.

use super::{StepCursor, VectorOperator};
use crate::metrics;
use crate::query::error::QueryError;
use crate::query::executor::{ExecutionContext, QueryOptions};
use crate::query::model::{StepVector, VectorPool};
use crate::types::Labels;
use std::sync::Arc;

/// Emits a constant at every evaluation timestamp
pub struct NumberLiteralOperator {
    value: f64,
    cursor: StepCursor,
    pool: Arc<VectorPool>,
    series: Arc<[Labels]>,
}

impl NumberLiteralOperator {
    /// Create a literal over the steps of `options`
    pub fn new(value: f64, options: &QueryOptions) -> Self {
        let pool = Arc::new(VectorPool::new(options.steps_per_batch));
        pool.set_step_size(1);
        Self {
            value,
            cursor: StepCursor::new(options.start, options.end, options.step),
            pool,
            series: Arc::from(vec![Labels::empty()]),
        }
    }
}

impl VectorOperator for NumberLiteralOperator {
    fn describe(&self) -> (String, Vec<&dyn VectorOperator>) {
        (format!("[number_literal] {}", self.value), Vec::new())
    }

    fn series(&mut self, _ctx: &ExecutionContext) -> Result<Arc<[Labels]>, QueryError> {
        Ok(self.series.clone())
    }

    fn pool(&self) -> Arc<VectorPool> {
        self.pool.clone()
    }

    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Vec<StepVector>>, QueryError> {
        if self.cursor.is_exhausted() {
            return Ok(None);
        }
        ctx.check()?;

        let mut batch = self.pool.get_vectors();
        for t in self.cursor.next_batch(self.pool.steps_per_batch()) {
            let mut step = self.pool.get_step_vector(t);
            step.push(0, self.value);
            batch.push(step);
        }
        metrics::record_batch("number_literal");
        Ok(Some(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::executor::ExecutorConfig;

    #[test]
    fn test_one_sample_per_step() {
        let opts = QueryOptions::range(0, 40, 10).unwrap().with_steps_per_batch(3);
        let mut op = NumberLiteralOperator::new(2.5, &opts);
        let ctx = ExecutionContext::new(&ExecutorConfig::default());

        assert_eq!(op.series(&ctx).unwrap().len(), 1);

        let first = op.next(&ctx).unwrap().unwrap();
        assert_eq!(first.iter().map(|s| s.t).collect::<Vec<_>>(), vec![0, 10, 20]);
        assert!(first.iter().all(|s| s.sample_ids == vec![0] && s.samples == vec![2.5]));

        let second = op.next(&ctx).unwrap().unwrap();
        assert_eq!(second.len(), 2);
        assert!(op.next(&ctx).unwrap().is_none());
        assert!(op.next(&ctx).unwrap().is_none());
    }
}
