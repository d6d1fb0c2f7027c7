//! Parsed query expressions
//!
//! The engine does not parse query text. A front end hands it an [`Expr`]
//! tree, built here either directly or through the small constructor helpers.
//! Only the node kinds the planner can compile are modelled: number and
//! string literals, instant-vector selectors, range-vector (matrix) selectors
//! and function calls.
//!
//! # Example
//!
//! ```rust
//! use promql_exec::query::ast::{Expr, ValueType};
//! use promql_exec::types::LabelMatcher;
//!
//! // rate(http_requests_total[5m])
//! let expr = Expr::call(
//!     "rate",
//!     vec![Expr::matrix(vec![LabelMatcher::metric("http_requests_total")], 300_000)],
//! );
//! assert_eq!(expr.value_type(), ValueType::Vector);
//! assert_eq!(expr.to_string(), "rate(http_requests_total[5m])");
//! ```

use crate::query::functions::catalog;
use crate::types::{LabelMatcher, MatchOp, METRIC_NAME};
use std::fmt;

// ============================================================================
// Value Types
// ============================================================================

/// Type of value an expression evaluates to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// One unlabelled value per step
    Scalar,
    /// One value per matched series per step (instant vector)
    Vector,
    /// A window of values per matched series per step (range vector)
    Matrix,
    /// A string constant
    String,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Scalar => write!(f, "scalar"),
            ValueType::Vector => write!(f, "instant vector"),
            ValueType::Matrix => write!(f, "range vector"),
            ValueType::String => write!(f, "string"),
        }
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// A parsed query expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric constant, e.g. `0.5`
    NumberLiteral(f64),

    /// String constant, e.g. `"job"`
    StringLiteral(String),

    /// Instant-vector selector, e.g. `up{job="api"}`
    VectorSelector(VectorSelector),

    /// Range-vector selector, e.g. `up{job="api"}[5m]`
    MatrixSelector(MatrixSelector),

    /// Function call, e.g. `rate(x[1m])`
    Call(Call),
}

impl Expr {
    /// Number literal
    pub fn number(value: f64) -> Self {
        Expr::NumberLiteral(value)
    }

    /// Instant-vector selector without offset
    pub fn selector(matchers: Vec<LabelMatcher>) -> Self {
        Expr::VectorSelector(VectorSelector::new(matchers))
    }

    /// Range-vector selector over `range_ms` without offset
    pub fn matrix(matchers: Vec<LabelMatcher>, range_ms: i64) -> Self {
        Expr::MatrixSelector(MatrixSelector {
            selector: VectorSelector::new(matchers),
            range_ms,
        })
    }

    /// Function call
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call(Call {
            name: name.into(),
            args,
        })
    }

    /// The type of value this expression produces
    ///
    /// Calls take the return type of the language built-in they name; a name
    /// unknown to the language is reported as a vector and rejected later by
    /// the function registry.
    pub fn value_type(&self) -> ValueType {
        match self {
            Expr::NumberLiteral(_) => ValueType::Scalar,
            Expr::StringLiteral(_) => ValueType::String,
            Expr::VectorSelector(_) => ValueType::Vector,
            Expr::MatrixSelector(_) => ValueType::Matrix,
            Expr::Call(call) => catalog::lookup(&call.name)
                .map(|sig| sig.return_type)
                .unwrap_or(ValueType::Vector),
        }
    }
}

impl Expr {
    /// Whether any selector appears in this expression
    pub fn has_selector(&self) -> bool {
        match self {
            Expr::VectorSelector(_) | Expr::MatrixSelector(_) => true,
            Expr::NumberLiteral(_) | Expr::StringLiteral(_) => false,
            Expr::Call(call) => call.args.iter().any(Expr::has_selector),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::NumberLiteral(v) => write!(f, "{}", v),
            Expr::StringLiteral(s) => write!(f, "{:?}", s),
            Expr::VectorSelector(sel) => write!(f, "{}", sel),
            Expr::MatrixSelector(sel) => write!(f, "{}", sel),
            Expr::Call(call) => write!(f, "{}", call),
        }
    }
}

/// Instant-vector selector
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSelector {
    /// Label matchers, all of which must match
    pub matchers: Vec<LabelMatcher>,
    /// `offset` modifier in milliseconds
    pub offset_ms: i64,
}

impl VectorSelector {
    /// Selector without offset
    pub fn new(matchers: Vec<LabelMatcher>) -> Self {
        Self {
            matchers,
            offset_ms: 0,
        }
    }

    /// Set the `offset` modifier
    pub fn with_offset(mut self, offset_ms: i64) -> Self {
        self.offset_ms = offset_ms;
        self
    }
}

impl fmt::Display for VectorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `name{...}` when the metric name is an equality matcher
        let name = self
            .matchers
            .iter()
            .find(|m| m.name == METRIC_NAME && m.op == MatchOp::Equal);
        if let Some(name) = name {
            write!(f, "{}", name.value)?;
        }
        let rest: Vec<String> = self
            .matchers
            .iter()
            .filter(|m| !name.is_some_and(|n| std::ptr::eq(*m, n)))
            .map(|m| m.to_string())
            .collect();
        if !rest.is_empty() || name.is_none() {
            write!(f, "{{{}}}", rest.join(", "))?;
        }
        if self.offset_ms != 0 {
            write!(f, " offset {}", DurationDisplay(self.offset_ms))?;
        }
        Ok(())
    }
}

/// Range-vector selector
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixSelector {
    /// Underlying series selection
    pub selector: VectorSelector,
    /// Window length in milliseconds
    pub range_ms: i64,
}

impl fmt::Display for MatrixSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let offset = self.selector.offset_ms;
        let inner = VectorSelector {
            matchers: self.selector.matchers.clone(),
            offset_ms: 0,
        };
        write!(f, "{}[{}]", inner, DurationDisplay(self.range_ms))?;
        if offset != 0 {
            write!(f, " offset {}", DurationDisplay(offset))?;
        }
        Ok(())
    }
}

/// Function call expression
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Function name as written
    pub name: String,
    /// Arguments in the language's argument order
    pub args: Vec<Expr>,
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

/// Millisecond duration rendered in the largest exact unit
struct DurationDisplay(i64);

impl fmt::Display for DurationDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [(i64, &str); 5] = [
            (86_400_000, "d"),
            (3_600_000, "h"),
            (60_000, "m"),
            (1_000, "s"),
            (1, "ms"),
        ];
        let ms = self.0;
        if ms == 0 {
            return write!(f, "0s");
        }
        for (size, unit) in UNITS {
            if ms % size == 0 {
                return write!(f, "{}{}", ms / size, unit);
            }
        }
        write!(f, "{}ms", ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_requests() -> Vec<LabelMatcher> {
        vec![
            LabelMatcher::metric("http_requests_total"),
            LabelMatcher::new(MatchOp::Equal, "job", "api").unwrap(),
        ]
    }

    #[test]
    fn test_value_types() {
        assert_eq!(Expr::number(1.0).value_type(), ValueType::Scalar);
        assert_eq!(Expr::selector(http_requests()).value_type(), ValueType::Vector);
        assert_eq!(Expr::matrix(http_requests(), 60_000).value_type(), ValueType::Matrix);
        assert_eq!(
            Expr::call("scalar", vec![Expr::selector(http_requests())]).value_type(),
            ValueType::Scalar
        );
        assert_eq!(
            Expr::call("vector", vec![Expr::number(1.0)]).value_type(),
            ValueType::Vector
        );
    }

    #[test]
    fn test_display() {
        let expr = Expr::call(
            "clamp",
            vec![Expr::selector(http_requests()), Expr::number(0.0), Expr::number(10.0)],
        );
        assert_eq!(expr.to_string(), r#"clamp(http_requests_total{job="api"}, 0, 10)"#);

        let expr = Expr::MatrixSelector(MatrixSelector {
            selector: VectorSelector::new(vec![LabelMatcher::metric("up")]).with_offset(3_600_000),
            range_ms: 90_000,
        });
        assert_eq!(expr.to_string(), "up[90s] offset 1h");
    }

    #[test]
    fn test_display_without_metric_name() {
        let expr = Expr::selector(vec![LabelMatcher::new(MatchOp::Regex, "job", "a|b").unwrap()]);
        assert_eq!(expr.to_string(), r#"{job=~"a|b"}"#);
    }
}
