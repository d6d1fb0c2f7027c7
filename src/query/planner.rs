//! Query Planner - expression to operator tree
//!
//! Compiles an [`Expr`] into the operator tree of one shard:
//!
//! ```text
//! Expr                               Operator
//! ─────────────────────────────────  ──────────────────────────────────
//! 1.5                                NumberLiteralOperator
//! up{job="api"}                      VectorSelectorOperator
//! rate(http_requests_total[5m])      MatrixSelectorOperator(rate)
//! clamp_min(up, 0)                   FunctionOperator ─┬─ VectorSelector
//!                                                      └─ NumberLiteral
//! ```
//!
//! # Selector Sharing
//!
//! Every tree built by the same planner draws from the same
//! [`SeriesSelector`] for a given matcher set and storage window. Building
//! one tree per shard therefore still resolves each selector against storage
//! exactly once.

use crate::query::ast::{Call, Expr, VectorSelector};
use crate::query::error::QueryError;
use crate::query::executor::QueryOptions;
use crate::query::functions::{catalog, FunctionRegistry};
use crate::query::operators::{
    FunctionOperator, MatrixSelectorOperator, NumberLiteralOperator, VectorOperator,
    VectorSelectorOperator,
};
use crate::query::selector::{SeriesSelector, DEFAULT_MEMO_WINDOW_MS};
use crate::storage::Queryable;
use crate::types::{MatchOp, TimeRange};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Identity of a shared selector: matchers plus storage window
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SelectorKey {
    matchers: Vec<(String, MatchOp, String)>,
    mint: i64,
    maxt: i64,
}

/// Builds operator trees for one query
pub struct Planner {
    storage: Arc<dyn Queryable>,
    options: QueryOptions,
    registry: FunctionRegistry,
    memo_window_ms: i64,
    selectors: Mutex<HashMap<SelectorKey, Arc<SeriesSelector>>>,
}

impl Planner {
    /// Create a planner over `storage` evaluating at the steps of `options`
    pub fn new(storage: Arc<dyn Queryable>, options: QueryOptions) -> Self {
        Self {
            storage,
            options,
            registry: FunctionRegistry::global().clone(),
            memo_window_ms: DEFAULT_MEMO_WINDOW_MS,
            selectors: Mutex::new(HashMap::new()),
        }
    }

    /// Bind function calls through `registry` instead of the built-in one
    pub fn with_registry(mut self, registry: FunctionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Memo window of the series iterators of every selector
    pub fn with_memo_window(mut self, memo_window_ms: i64) -> Self {
        self.memo_window_ms = memo_window_ms;
        self
    }

    /// Evaluation settings of this query
    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Number of distinct selectors created so far
    pub fn selector_count(&self) -> usize {
        self.selectors.lock().len()
    }

    /// Build the operator tree of shard `shard` out of `num_shards`
    ///
    /// # Errors
    ///
    /// - `Construction` for an invalid shard, a wrong argument count or a
    ///   malformed argument shape
    /// - `NotImplemented` for functions without a kernel and for range
    ///   vectors or strings outside of a function call
    /// - `NotSupported` for function names unknown to the language
    pub fn build(
        &self,
        expr: &Expr,
        shard: usize,
        num_shards: usize,
    ) -> Result<Box<dyn VectorOperator>, QueryError> {
        if num_shards == 0 || shard >= num_shards {
            return Err(QueryError::construction(format!(
                "invalid shard {} of {}",
                shard, num_shards
            )));
        }

        match expr {
            Expr::NumberLiteral(v) => Ok(Box::new(NumberLiteralOperator::new(*v, &self.options))),
            Expr::VectorSelector(sel) => {
                let mint = self.options.start - self.options.lookback_delta - sel.offset_ms;
                let maxt = self.options.end - sel.offset_ms;
                let selector = self.selector(sel, mint, maxt)?;
                Ok(Box::new(VectorSelectorOperator::new(
                    selector,
                    &self.options,
                    sel.offset_ms,
                    shard,
                    num_shards,
                )))
            }
            Expr::MatrixSelector(sel) => Err(QueryError::not_implemented(format!(
                "range vector {} must be the argument of a function",
                sel
            ))),
            Expr::StringLiteral(s) => Err(QueryError::not_implemented(format!(
                "string literal {:?} cannot be evaluated on its own",
                s
            ))),
            Expr::Call(call) => self.build_call(call, shard, num_shards),
        }
    }

    fn build_call(
        &self,
        call: &Call,
        shard: usize,
        num_shards: usize,
    ) -> Result<Box<dyn VectorOperator>, QueryError> {
        if let Some(sig) = catalog::lookup(&call.name) {
            if !sig.accepts_arity(call.args.len()) {
                return Err(QueryError::construction(format!(
                    "wrong number of arguments in {}",
                    call
                )));
            }
        }
        let kernel = self.registry.get(&call.name)?;

        let matrix = call.args.iter().find_map(|a| match a {
            Expr::MatrixSelector(m) => Some(m),
            _ => None,
        });
        if let Some(m) = matrix {
            if call.args.len() != 1 {
                return Err(QueryError::not_implemented(format!(
                    "scalar arguments of range function {}",
                    call
                )));
            }
            let sel = &m.selector;
            let mint = self.options.start - m.range_ms - sel.offset_ms;
            let maxt = self.options.end - sel.offset_ms;
            let selector = self.selector(sel, mint, maxt)?;
            return Ok(Box::new(MatrixSelectorOperator::new(
                selector,
                call.name.clone(),
                kernel,
                &self.options,
                m.range_ms,
                sel.offset_ms,
                shard,
                num_shards,
            )));
        }

        let children = call
            .args
            .iter()
            .map(|arg| self.build(arg, shard, num_shards))
            .collect::<Result<Vec<_>, _>>()?;
        let op = FunctionOperator::new(call, kernel, children, self.options.steps_per_batch)?;
        Ok(Box::new(op))
    }

    fn selector(
        &self,
        sel: &VectorSelector,
        mint: i64,
        maxt: i64,
    ) -> Result<Arc<SeriesSelector>, QueryError> {
        let key = SelectorKey {
            matchers: sel
                .matchers
                .iter()
                .map(|m| (m.name.clone(), m.op, m.value.clone()))
                .collect(),
            mint,
            maxt,
        };

        let mut selectors = self.selectors.lock();
        if let Some(existing) = selectors.get(&key) {
            return Ok(existing.clone());
        }

        let range = TimeRange::new(mint, maxt)
            .map_err(|e| QueryError::construction(format!("selector window: {}", e)))?;
        let selector = Arc::new(
            SeriesSelector::new(self.storage.clone(), range, sel.matchers.clone())
                .with_memo_window(self.memo_window_ms),
        );
        debug!(selector = %sel, range = %range, "Created series selector");
        selectors.insert(key, selector.clone());
        Ok(selector)
    }
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner")
            .field("options", &self.options)
            .field("selectors", &self.selector_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::QueryErrorKind;
    use crate::query::operators::explain;
    use crate::storage::InMemoryStorage;
    use crate::types::{LabelMatcher, Labels, Point};

    fn planner() -> (Arc<InMemoryStorage>, Planner) {
        let storage = Arc::new(InMemoryStorage::new());
        storage.add_series(
            Labels::from_pairs([("__name__", "up"), ("job", "a")]),
            [Point::new(0, 1.0)],
        );
        let options = QueryOptions::range(0, 60_000, 15_000).unwrap();
        (storage.clone(), Planner::new(storage, options))
    }

    fn up() -> Vec<LabelMatcher> {
        vec![LabelMatcher::metric("up")]
    }

    #[test]
    fn test_builds_expected_tree() {
        let (_, planner) = planner();
        let expr = Expr::call("clamp_min", vec![Expr::selector(up()), Expr::number(0.0)]);
        let op = planner.build(&expr, 0, 1).unwrap();
        let text = explain(op.as_ref());
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("[function] clamp_min(up, 0)"));
        assert!(lines[1].starts_with("  [vector_selector]"));
        assert_eq!(lines[2], "  [number_literal] 0");
    }

    #[test]
    fn test_range_function_uses_matrix_leaf() {
        let (_, planner) = planner();
        let expr = Expr::call("rate", vec![Expr::matrix(up(), 60_000)]);
        let op = planner.build(&expr, 0, 1).unwrap();
        assert!(explain(op.as_ref()).starts_with("[matrix_selector] rate("));
    }

    #[test]
    fn test_selectors_shared_across_shards() {
        let (storage, planner) = planner();
        let expr = Expr::call("sum_over_time", vec![Expr::matrix(up(), 60_000)]);
        let ctx = crate::query::executor::ExecutionContext::new(&Default::default());

        for shard in 0..3 {
            let mut op = planner.build(&expr, shard, 3).unwrap();
            op.series(&ctx).unwrap();
        }
        assert_eq!(planner.selector_count(), 1);
        assert_eq!(storage.querier_calls(), 1);

        // A different window is a different selector
        planner.build(&Expr::selector(up()), 0, 1).unwrap();
        assert_eq!(planner.selector_count(), 2);
    }

    #[test]
    fn test_function_resolution_errors() {
        let (_, planner) = planner();

        let holt_winters = Expr::call(
            "holt_winters",
            vec![Expr::matrix(up(), 60_000), Expr::number(0.5), Expr::number(0.5)],
        );
        let err = planner.build(&holt_winters, 0, 1).err().unwrap();
        assert_eq!(err.kind, QueryErrorKind::NotImplemented);

        let err = planner
            .build(&Expr::call("no_such_function", vec![Expr::selector(up())]), 0, 1)
            .err()
            .unwrap();
        assert_eq!(err.kind, QueryErrorKind::NotSupported);

        let err = planner
            .build(&Expr::call("rate", vec![]), 0, 1)
            .err()
            .unwrap();
        assert_eq!(err.kind, QueryErrorKind::Construction);
    }

    #[test]
    fn test_unsupported_shapes() {
        let (_, planner) = planner();
        let err = planner.build(&Expr::matrix(up(), 60_000), 0, 1).err().unwrap();
        assert_eq!(err.kind, QueryErrorKind::NotImplemented);

        let err = planner
            .build(&Expr::StringLiteral("job".to_string()), 0, 1)
            .err()
            .unwrap();
        assert_eq!(err.kind, QueryErrorKind::NotImplemented);

        let err = planner.build(&Expr::number(1.0), 2, 2).err().unwrap();
        assert_eq!(err.kind, QueryErrorKind::Construction);
    }
}
