//! Query Operators - batched pull execution
//!
//! Every node of an operator tree implements [`VectorOperator`]. A consumer
//! pulls batches of [`StepVector`]s from the root; each operator pulls from
//! its children on demand, transforms the batch and hands it upward.
//!
//! - [`VectorSelectorOperator`] reads the latest sample per series and step
//! - [`MatrixSelectorOperator`] evaluates a range function over a look-back window
//! - [`NumberLiteralOperator`] emits a constant scalar per step
//! - [`FunctionOperator`] applies a function to an instant-vector child
//!
//! # Protocol
//!
//! - `series` is computed at most once and is stable for the whole query;
//!   the index of a label set in it is the sample id used in step vectors
//! - `next` returns `Ok(None)` once exhausted and keeps doing so
//! - a batch returned by `next` belongs to the caller, who either forwards it
//!   or recycles it into the producing operator's [`VectorPool`]
//! - errors from children abort the pull and are returned unchanged

pub mod function;
pub mod literal;
pub mod matrix_selector;
pub mod vector_selector;

pub use function::FunctionOperator;
pub use literal::NumberLiteralOperator;
pub use matrix_selector::MatrixSelectorOperator;
pub use vector_selector::VectorSelectorOperator;

use crate::query::error::QueryError;
use crate::query::executor::ExecutionContext;
use crate::query::model::{StepVector, VectorPool};
use crate::types::Labels;
use std::fmt::Write;
use std::sync::Arc;

/// Common interface for all query operators
pub trait VectorOperator: Send {
    /// Operator description and its children, for diagnostics only
    fn describe(&self) -> (String, Vec<&dyn VectorOperator>);

    /// Output series; position `i` is identified by sample id `i`
    ///
    /// Resolved lazily on first call (directly or through `next`) and cached.
    fn series(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>, QueryError>;

    /// Pool that consumers recycle this operator's batches into
    fn pool(&self) -> Arc<VectorPool>;

    /// Pull the next batch
    ///
    /// Returns:
    /// - `Ok(Some(batch))` - one step vector per consecutive step
    /// - `Ok(None)` - input exhausted (repeatable)
    /// - `Err(e)` - a child or storage failed, or the query was cancelled
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Vec<StepVector>>, QueryError>;
}

/// Render the operator tree rooted at `op`, one operator per line
pub fn explain(op: &dyn VectorOperator) -> String {
    let mut out = String::new();
    explain_into(op, 0, &mut out);
    out
}

fn explain_into(op: &dyn VectorOperator, depth: usize, out: &mut String) {
    let (me, children) = op.describe();
    // Writing into a String cannot fail
    let _ = writeln!(out, "{}{}", "  ".repeat(depth), me);
    for child in children {
        explain_into(child, depth + 1, out);
    }
}

/// Step timestamps of a query, walked batch by batch by leaf operators
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepCursor {
    current: i64,
    end: i64,
    step: i64,
}

impl StepCursor {
    pub(crate) fn new(start: i64, end: i64, step: i64) -> Self {
        Self {
            current: start,
            end,
            // Instant queries have start == end and no step
            step: step.max(1),
        }
    }

    /// Timestamps of the next batch of at most `max` steps
    pub(crate) fn next_batch(&mut self, max: usize) -> impl Iterator<Item = i64> {
        let start = self.current;
        let mut count = 0usize;
        while count < max && self.current <= self.end {
            self.current += self.step;
            count += 1;
        }
        let step = self.step;
        (0..count as i64).map(move |i| start + i * step)
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.current > self.end
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// Operator replaying a fixed list of batches
    pub(crate) struct ReplayOperator {
        pub(crate) name: &'static str,
        pub(crate) series: Arc<[Labels]>,
        pub(crate) batches: std::collections::VecDeque<Vec<StepVector>>,
        pub(crate) pool: Arc<VectorPool>,
        pub(crate) next_calls: usize,
    }

    impl ReplayOperator {
        pub(crate) fn new(
            name: &'static str,
            series: Vec<Labels>,
            batches: Vec<Vec<StepVector>>,
        ) -> Self {
            Self {
                name,
                series: series.into(),
                batches: batches.into(),
                pool: Arc::new(VectorPool::new(10)),
                next_calls: 0,
            }
        }

        /// Scalar operator emitting `values[i]` at step `i`, `None` for no sample
        pub(crate) fn scalar(values: &[Option<f64>], start: i64, step: i64) -> Self {
            let batch = values
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let mut sv = StepVector::new(start + i as i64 * step);
                    if let Some(v) = v {
                        sv.push(0, *v);
                    }
                    sv
                })
                .collect();
            Self::new("scalar", vec![Labels::empty()], vec![batch])
        }
    }

    impl VectorOperator for ReplayOperator {
        fn describe(&self) -> (String, Vec<&dyn VectorOperator>) {
            (format!("[replay] {}", self.name), Vec::new())
        }

        fn series(&mut self, _ctx: &ExecutionContext) -> Result<Arc<[Labels]>, QueryError> {
            Ok(self.series.clone())
        }

        fn pool(&self) -> Arc<VectorPool> {
            self.pool.clone()
        }

        fn next(&mut self, _ctx: &ExecutionContext) -> Result<Option<Vec<StepVector>>, QueryError> {
            self.next_calls += 1;
            Ok(self.batches.pop_front())
        }
    }

    /// Operator failing every call
    pub(crate) struct FailingOperator;

    impl VectorOperator for FailingOperator {
        fn describe(&self) -> (String, Vec<&dyn VectorOperator>) {
            ("[failing]".to_string(), Vec::new())
        }

        fn series(&mut self, _ctx: &ExecutionContext) -> Result<Arc<[Labels]>, QueryError> {
            Err(QueryError::storage("series unavailable"))
        }

        fn pool(&self) -> Arc<VectorPool> {
            Arc::new(VectorPool::default())
        }

        fn next(&mut self, _ctx: &ExecutionContext) -> Result<Option<Vec<StepVector>>, QueryError> {
            Err(QueryError::storage("next unavailable"))
        }
    }
}
