//! Function operator
//!
//! Applies one function to the samples of its vector-typed child, batch by
//! batch. Scalar-typed sibling children are pulled in lockstep and their
//! per-step values handed to the kernel as scalar arguments.
//!
//! ```text
//!            FunctionOperator  clamp(x, 0, 10)
//!           /        |        \
//!      x (vector)  0 (scalar)  10 (scalar)
//! ```
//!
//! Batches of the vector child are forwarded upward with their values
//! replaced in place. Samples the kernel suppresses are removed from their
//! step. Scalar children's batches are recycled into their own pools right
//! after their values are copied out.

use super::VectorOperator;
use crate::metrics;
use crate::query::ast::{Call, ValueType};
use crate::query::error::QueryError;
use crate::query::executor::ExecutionContext;
use crate::query::functions::{FunctionArgs, FunctionCall};
use crate::query::model::{StepVector, VectorPool};
use crate::types::{Labels, Point};
use std::sync::Arc;
use tracing::debug;

/// Evaluates a function over a vector child and optional scalar children
pub struct FunctionOperator {
    /// The call being evaluated
    expr: Call,

    /// Bound kernel
    call: FunctionCall,

    /// One child per argument, in argument order
    children: Vec<Box<dyn VectorOperator>>,

    /// Argument slot of the vector-typed input
    vector_index: usize,

    /// Output series, resolved on first use
    series: Option<Arc<[Labels]>>,

    /// Scalar argument values: one row per step, one column per scalar argument
    scalar_rows: Vec<Vec<f64>>,
}

impl FunctionOperator {
    /// Bind `call` to `function` over `children`
    ///
    /// The vector-typed input is the first argument of instant-vector type,
    /// or the first argument if there is none (`vector(1)`).
    ///
    /// # Errors
    ///
    /// - `Construction` for a call without arguments or a child count that
    ///   differs from the argument count
    /// - `NotImplemented` if the input argument is a range vector or string
    pub fn new(
        expr: &Call,
        function: FunctionCall,
        children: Vec<Box<dyn VectorOperator>>,
        steps_per_batch: usize,
    ) -> Result<Self, QueryError> {
        if expr.args.is_empty() {
            return Err(QueryError::construction(format!(
                "function {} has no argument to operate on",
                expr
            )));
        }
        if children.len() != expr.args.len() {
            return Err(QueryError::construction(format!(
                "{} expects {} child operators, got {}",
                expr,
                expr.args.len(),
                children.len()
            )));
        }

        let vector_index = expr
            .args
            .iter()
            .position(|a| a.value_type() == ValueType::Vector)
            .unwrap_or(0);
        match expr.args[vector_index].value_type() {
            ValueType::Vector | ValueType::Scalar => {}
            other => {
                return Err(QueryError::not_implemented(format!(
                    "{} argument of {} is not supported by the function operator",
                    other, expr
                )))
            }
        }

        debug!(
            function = %expr.name,
            args = expr.args.len(),
            vector_index,
            "Function operator created"
        );

        Ok(Self {
            expr: expr.clone(),
            call: function,
            children,
            vector_index,
            series: None,
            scalar_rows: Vec::with_capacity(steps_per_batch),
        })
    }

    /// Argument slot of the vector-typed input
    pub fn vector_index(&self) -> usize {
        self.vector_index
    }

    fn resolve_series(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>, QueryError> {
        if let Some(series) = &self.series {
            return Ok(series.clone());
        }

        let series: Arc<[Labels]> = match self.expr.name.as_str() {
            "vector" => Arc::from(vec![Labels::empty()]),
            "scalar" => Arc::from(Vec::<Labels>::new()),
            name => {
                let input = self.children[self.vector_index].series(ctx)?;
                if name == "last_over_time" {
                    input
                } else {
                    input.iter().map(Labels::drop_metric_name).collect()
                }
            }
        };
        self.series = Some(series.clone());
        Ok(series)
    }

    /// Pull every scalar child once and fill `scalar_rows` for `steps` steps
    fn load_scalar_args(&mut self, ctx: &ExecutionContext, steps: usize) -> Result<(), QueryError> {
        let columns = self.children.len() - 1;
        self.scalar_rows.resize_with(steps, Vec::new);
        for row in &mut self.scalar_rows {
            row.clear();
            row.resize(columns, f64::NAN);
        }

        let mut column = 0;
        for (slot, child) in self.children.iter_mut().enumerate() {
            if slot == self.vector_index {
                continue;
            }
            if let Some(batch) = child.next(ctx)? {
                for (row, step) in self.scalar_rows.iter_mut().zip(&batch) {
                    if let Some(v) = step.samples.first() {
                        row[column] = *v;
                    }
                }
                child.pool().put_vectors(batch);
            }
            column += 1;
        }
        Ok(())
    }
}

impl VectorOperator for FunctionOperator {
    fn describe(&self) -> (String, Vec<&dyn VectorOperator>) {
        (
            format!("[function] {}", self.expr),
            self.children.iter().map(|c| c.as_ref()).collect(),
        )
    }

    fn series(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>, QueryError> {
        self.resolve_series(ctx)
    }

    fn pool(&self) -> Arc<VectorPool> {
        self.children[self.vector_index].pool()
    }

    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Vec<StepVector>>, QueryError> {
        ctx.check()?;
        let series = self.resolve_series(ctx)?;

        let mut batch = match self.children[self.vector_index].next(ctx)? {
            Some(batch) if !batch.is_empty() => batch,
            exhausted => return Ok(exhausted),
        };

        if let Err(err) = self.load_scalar_args(ctx, batch.len()) {
            self.pool().put_vectors(batch);
            return Err(err);
        }

        if self.expr.name == "scalar" {
            for step in &mut batch {
                if step.len() > 1 {
                    step.truncate(1);
                }
                if let Some(v) = step.samples.first_mut() {
                    *v = f64::NAN;
                }
            }
            metrics::record_batch("function");
            return Ok(Some(batch));
        }

        let unlabelled = Labels::empty();
        let mut calls = 0usize;
        for (step, scalars) in batch.iter_mut().zip(&self.scalar_rows) {
            let t = step.t;
            let mut kept = 0;
            for i in 0..step.len() {
                let id = step.sample_ids[i];
                let labels = series.get(id as usize).unwrap_or(&unlabelled);
                let point = [Point::new(t, step.samples[i])];
                let result = (self.call)(&FunctionArgs {
                    labels,
                    points: &point,
                    step_time: t,
                    select_range: 0,
                    scalar_points: scalars,
                    offset: 0,
                });
                calls += 1;

                // Suppressed samples leave the step; survivors keep their order
                if !result.is_invalid() {
                    step.sample_ids[kept] = id;
                    step.samples[kept] = result.v;
                    kept += 1;
                }
            }
            step.truncate(kept);
        }

        metrics::record_function_calls(&self.expr.name, calls);
        metrics::record_batch("function");
        Ok(Some(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::Expr;
    use crate::query::error::QueryErrorKind;
    use crate::query::executor::ExecutorConfig;
    use crate::query::functions::FunctionRegistry;
    use crate::query::operators::test_util::{FailingOperator, ReplayOperator};
    use crate::types::{LabelMatcher, METRIC_NAME};

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(&ExecutorConfig::default())
    }

    fn step(t: i64, samples: &[(u64, f64)]) -> StepVector {
        let mut sv = StepVector::new(t);
        for (id, v) in samples {
            sv.push(*id, *v);
        }
        sv
    }

    fn metric(name: &str, job: &str) -> Labels {
        Labels::from_pairs([(METRIC_NAME, name), ("job", job)])
    }

    fn vector_arg() -> Expr {
        Expr::selector(vec![LabelMatcher::metric("x")])
    }

    fn operator(
        name: &str,
        args: Vec<Expr>,
        children: Vec<Box<dyn VectorOperator>>,
    ) -> Result<FunctionOperator, QueryError> {
        let call = match Expr::call(name, args) {
            Expr::Call(call) => call,
            _ => unreachable!(),
        };
        FunctionOperator::new(&call, FunctionRegistry::global().get(name)?, children, 10)
    }

    fn input(batches: Vec<Vec<StepVector>>) -> Box<dyn VectorOperator> {
        Box::new(ReplayOperator::new(
            "input",
            vec![metric("x", "a"), metric("x", "b")],
            batches,
        ))
    }

    #[test]
    fn test_metric_name_dropped_except_last_over_time() {
        let ctx = ctx();
        let mut last = operator("last_over_time", vec![vector_arg()], vec![input(vec![])]).unwrap();
        assert_eq!(last.series(&ctx).unwrap()[0].metric_name(), Some("x"));

        let mut sum = operator("sum_over_time", vec![vector_arg()], vec![input(vec![])]).unwrap();
        let series = sum.series(&ctx).unwrap();
        assert_eq!(series[0].metric_name(), None);
        assert_eq!(series[1].get("job"), Some("b"));
    }

    #[test]
    fn test_special_form_series() {
        let ctx = ctx();
        let mut vector = operator(
            "vector",
            vec![Expr::number(1.0)],
            vec![Box::new(ReplayOperator::scalar(&[Some(1.0)], 0, 1))],
        )
        .unwrap();
        assert_eq!(&*vector.series(&ctx).unwrap(), &[Labels::empty()]);

        let mut scalar = operator("scalar", vec![vector_arg()], vec![input(vec![])]).unwrap();
        assert!(scalar.series(&ctx).unwrap().is_empty());
    }

    #[test]
    fn test_values_replaced_in_place() {
        let batch = vec![step(0, &[(0, -5.0), (1, 5.0)]), step(10, &[(1, -1.0)])];
        let mut op = operator(
            "clamp_min",
            vec![vector_arg(), Expr::number(0.0)],
            vec![
                input(vec![batch]),
                Box::new(ReplayOperator::scalar(&[Some(0.0), Some(0.0)], 0, 10)),
            ],
        )
        .unwrap();
        let ctx = ctx();

        let out = op.next(&ctx).unwrap().unwrap();
        assert_eq!(out[0].sample_ids, vec![0, 1]);
        assert_eq!(out[0].samples, vec![0.0, 5.0]);
        assert_eq!(out[1].sample_ids, vec![1]);
        assert_eq!(out[1].samples, vec![0.0]);
        assert!(op.next(&ctx).unwrap().is_none());
    }

    #[test]
    fn test_scalar_args_per_step_and_recycled() {
        // The upper bound changes per step; missing samples become NaN
        let batch = vec![step(0, &[(0, 7.0)]), step(10, &[(0, 7.0)]), step(20, &[(0, 7.0)])];
        let upper = ReplayOperator::scalar(&[Some(5.0), Some(9.0), None], 0, 10);
        let upper_pool = upper.pool.clone();
        let mut op = operator(
            "clamp",
            vec![vector_arg(), Expr::number(0.0), Expr::number(0.0)],
            vec![
                input(vec![batch]),
                Box::new(ReplayOperator::scalar(&[Some(0.0), Some(0.0), Some(0.0)], 0, 10)),
                Box::new(upper),
            ],
        )
        .unwrap();

        let out = op.next(&ctx()).unwrap().unwrap();
        assert_eq!(out[0].samples[0], 5.0);
        assert_eq!(out[1].samples[0], 7.0);
        // max = NaN: clamp yields NaN
        assert!(out[2].samples[0].is_nan());

        let _ = upper_pool.get_vectors();
        assert_eq!(upper_pool.stats().vectors_reused, 1);
    }

    #[test]
    fn test_invalid_results_removed_from_step() {
        // min > max at t=0 suppresses both samples; t=10 keeps a valid bound
        let batch = vec![
            step(0, &[(0, 3.0), (1, 7.0)]),
            step(10, &[(0, 3.0), (1, 7.0)]),
        ];
        let mut op = operator(
            "clamp",
            vec![vector_arg(), Expr::number(10.0), Expr::number(5.0)],
            vec![
                input(vec![batch]),
                Box::new(ReplayOperator::scalar(&[Some(10.0), Some(0.0)], 0, 10)),
                Box::new(ReplayOperator::scalar(&[Some(5.0), Some(5.0)], 0, 10)),
            ],
        )
        .unwrap();

        let out = op.next(&ctx()).unwrap().unwrap();
        assert!(out[0].is_empty());
        assert_eq!(out[1].sample_ids, vec![0, 1]);
        assert_eq!(out[1].samples, vec![3.0, 5.0]);
    }

    #[test]
    fn test_scalar_child_error_recycles_vector_batch() {
        let leaf = ReplayOperator::new(
            "input",
            vec![metric("x", "a")],
            vec![vec![step(0, &[(0, 1.0)])]],
        );
        let pool = leaf.pool.clone();
        let mut op = operator(
            "clamp_min",
            vec![vector_arg(), Expr::number(0.0)],
            vec![Box::new(leaf), Box::new(FailingOperator)],
        )
        .unwrap();

        let err = op.next(&ctx()).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::Storage);

        let _ = pool.get_vectors();
        assert_eq!(pool.stats().vectors_reused, 1);
    }

    #[test]
    fn test_scalar_special_case() {
        let batch = vec![
            step(0, &[(0, 4.0)]),
            step(10, &[(0, 1.0), (1, 2.0)]),
            step(20, &[]),
        ];
        let mut op = operator("scalar", vec![vector_arg()], vec![input(vec![batch])]).unwrap();

        let out = op.next(&ctx()).unwrap().unwrap();
        assert_eq!(out[0].len(), 1);
        assert!(out[0].samples[0].is_nan());
        assert_eq!(out[1].sample_ids, vec![0]);
        assert!(out[1].samples[0].is_nan());
        assert!(out[2].is_empty());
    }

    #[test]
    fn test_vector_of_scalar() {
        let mut op = operator(
            "vector",
            vec![Expr::number(3.0)],
            vec![Box::new(ReplayOperator::scalar(&[Some(3.0), Some(3.0)], 0, 10))],
        )
        .unwrap();
        let out = op.next(&ctx()).unwrap().unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].sample_ids, vec![0]);
        assert_eq!(out[1].samples, vec![3.0]);
    }

    #[test]
    fn test_empty_batch_stops_before_scalar_children() {
        let mut op = operator(
            "clamp_max",
            vec![vector_arg(), Expr::number(1.0)],
            vec![input(vec![Vec::new()]), Box::new(ReplayOperator::scalar(&[Some(1.0)], 0, 1))],
        )
        .unwrap();
        let out = op.next(&ctx()).unwrap().unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_child_errors_propagate() {
        let mut op =
            operator("sum_over_time", vec![vector_arg()], vec![Box::new(FailingOperator)]).unwrap();
        let ctx = ctx();
        assert_eq!(op.series(&ctx).unwrap_err().kind, QueryErrorKind::Storage);
        assert_eq!(op.next(&ctx).unwrap_err().kind, QueryErrorKind::Storage);
    }

    #[test]
    fn test_construction_errors() {
        let call = Call {
            name: "sum_over_time".to_string(),
            args: vec![],
        };
        let kernel = FunctionRegistry::global().get("sum_over_time").unwrap();
        let err = FunctionOperator::new(&call, kernel, vec![], 10).err().unwrap();
        assert_eq!(err.kind, QueryErrorKind::Construction);

        let err = operator("sum_over_time", vec![vector_arg()], vec![]).err().unwrap();
        assert_eq!(err.kind, QueryErrorKind::Construction);

        let err = operator(
            "rate",
            vec![Expr::matrix(vec![LabelMatcher::metric("x")], 60_000)],
            vec![input(vec![])],
        )
        .err()
        .unwrap();
        assert_eq!(err.kind, QueryErrorKind::NotImplemented);
    }

    #[test]
    fn test_cancelled_context() {
        let mut op = operator(
            "sum_over_time",
            vec![vector_arg()],
            vec![input(vec![vec![step(0, &[(0, 1.0)])]])],
        )
        .unwrap();
        let ctx = ctx();
        ctx.cancel();
        assert_eq!(op.next(&ctx).unwrap_err().kind, QueryErrorKind::Cancelled);
    }
}
