//! Function library
//!
//! Maps function names to pure numeric kernels. A kernel receives the
//! look-back window of one series at one step and returns one sample, or
//! [`Point::INVALID`] to suppress it.
//!
//! # Example
//!
//! ```rust
//! use promql_exec::query::functions::{FunctionArgs, FunctionRegistry};
//! use promql_exec::types::{Labels, Point};
//!
//! let rate = FunctionRegistry::global().get("rate").unwrap();
//! let labels = Labels::empty();
//! let points = [Point::new(0, 0.0), Point::new(60_000, 120.0)];
//! let out = rate(&FunctionArgs {
//!     labels: &labels,
//!     points: &points,
//!     step_time: 60_000,
//!     select_range: 60_000,
//!     scalar_points: &[],
//!     offset: 0,
//! });
//! assert_eq!(out.v, 2.0);
//! ```

pub mod catalog;
pub mod kernels;

pub use catalog::FunctionSignature;
pub use kernels::{kahan_sum_inc, linear_regression};

use crate::query::error::QueryError;
use crate::types::{Labels, Point};
use lazy_static::lazy_static;
use std::collections::HashMap;

/// Inputs of one kernel invocation
#[derive(Debug, Clone, Copy)]
pub struct FunctionArgs<'a> {
    /// Label set of the series being evaluated
    pub labels: &'a Labels,
    /// Look-back window points, ascending by timestamp
    pub points: &'a [Point],
    /// Evaluation timestamp (ms)
    pub step_time: i64,
    /// Length of the range selector (ms), zero for instant functions
    pub select_range: i64,
    /// Values of the scalar arguments at this step, in argument order
    pub scalar_points: &'a [f64],
    /// `offset` modifier of the selector (ms)
    pub offset: i64,
}

/// A function kernel
pub type FunctionCall = fn(&FunctionArgs<'_>) -> Point;

/// Name to kernel mapping consulted when binding a call
#[derive(Clone)]
pub struct FunctionRegistry {
    functions: HashMap<&'static str, FunctionCall>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

lazy_static! {
    static ref GLOBAL_REGISTRY: FunctionRegistry = FunctionRegistry::new();
}

impl FunctionRegistry {
    /// Registry with every built-in kernel
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("sum_over_time", kernels::sum_over_time);
        registry.register("avg_over_time", kernels::avg_over_time);
        registry.register("max_over_time", kernels::max_over_time);
        registry.register("min_over_time", kernels::min_over_time);
        registry.register("count_over_time", kernels::count_over_time);
        registry.register("stddev_over_time", kernels::stddev_over_time);
        registry.register("stdvar_over_time", kernels::stdvar_over_time);
        registry.register("last_over_time", kernels::last_over_time);
        registry.register("present_over_time", kernels::present_over_time);
        registry.register("changes", kernels::changes);
        registry.register("resets", kernels::resets);
        registry.register("deriv", kernels::deriv);
        registry.register("irate", kernels::irate);
        registry.register("idelta", kernels::idelta);
        registry.register("rate", kernels::rate);
        registry.register("delta", kernels::delta);
        registry.register("increase", kernels::increase);
        registry.register("vector", kernels::vector);
        registry.register("scalar", kernels::scalar);
        registry.register("clamp", kernels::clamp);
        registry.register("clamp_min", kernels::clamp_min);
        registry.register("clamp_max", kernels::clamp_max);
        registry
    }

    /// Registry without any function
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Shared registry of built-in kernels
    pub fn global() -> &'static FunctionRegistry {
        &GLOBAL_REGISTRY
    }

    /// Add or replace a kernel
    pub fn register(&mut self, name: &'static str, call: FunctionCall) {
        self.functions.insert(name, call);
    }

    /// Resolve a function name
    ///
    /// # Errors
    ///
    /// - `NotImplemented` if the language defines `name` but no kernel is registered
    /// - `NotSupported` if the language does not know `name`
    pub fn get(&self, name: &str) -> Result<FunctionCall, QueryError> {
        if let Some(call) = self.functions.get(name) {
            return Ok(*call);
        }
        let msg = format!("unknown function: {}", name);
        if catalog::is_builtin(name) {
            Err(QueryError::not_implemented(msg))
        } else {
            Err(QueryError::not_supported(msg))
        }
    }

    /// Whether a kernel is registered for `name`
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered function names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.functions.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::QueryErrorKind;

    #[test]
    fn test_lookup_kinds() {
        let registry = FunctionRegistry::new();
        assert!(registry.get("rate").is_ok());

        let err = registry.get("holt_winters").err().unwrap();
        assert_eq!(err.kind, QueryErrorKind::NotImplemented);
        assert!(err.message.contains("holt_winters"));

        let err = registry.get("rates").err().unwrap();
        assert_eq!(err.kind, QueryErrorKind::NotSupported);
    }

    #[test]
    fn test_every_kernel_is_a_builtin() {
        for name in FunctionRegistry::global().names() {
            assert!(catalog::is_builtin(name), "{} is not a language built-in", name);
        }
    }

    #[test]
    fn test_register_custom_kernel() {
        fn double(f: &FunctionArgs<'_>) -> Point {
            match f.points.first() {
                Some(p) => Point::new(f.step_time, p.v * 2.0),
                None => Point::INVALID,
            }
        }

        let mut registry = FunctionRegistry::empty();
        assert_eq!(
            registry.get("abs").err().unwrap().kind,
            QueryErrorKind::NotImplemented
        );
        registry.register("abs", double);
        assert!(registry.contains("abs"));
        let labels = Labels::empty();
        let out = registry.get("abs").unwrap()(&FunctionArgs {
            labels: &labels,
            points: &[Point::new(0, 2.0)],
            step_time: 5,
            select_range: 0,
            scalar_points: &[],
            offset: 0,
        });
        assert_eq!(out, Point::new(5, 4.0));
    }
}
