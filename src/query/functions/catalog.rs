//! Built-in functions of the query language
//!
//! Every function the language defines, with its argument and return types.
//! Used to tell a function that is not implemented by this engine apart from
//! a name the language does not know at all, and to type-check call arguments.

use crate::query::ast::ValueType;
use lazy_static::lazy_static;
use std::collections::HashMap;

use ValueType::{Matrix, Scalar, String as Str, Vector};

/// Signature of a language built-in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSignature {
    /// Function name
    pub name: &'static str,
    /// Types of the declared arguments
    pub arg_types: &'static [ValueType],
    /// Trailing arguments that may be omitted (`None` = unbounded repetition
    /// of the last argument type)
    pub optional_args: Option<usize>,
    /// Type of the returned value
    pub return_type: ValueType,
}

impl FunctionSignature {
    /// Whether `n` arguments is an acceptable arity
    pub fn accepts_arity(&self, n: usize) -> bool {
        let max = self.arg_types.len();
        match self.optional_args {
            Some(optional) => n <= max && n + optional >= max,
            None => n + 1 >= max,
        }
    }

    /// Declared type of argument `i`
    pub fn arg_type(&self, i: usize) -> Option<ValueType> {
        self.arg_types
            .get(i)
            .or_else(|| match self.optional_args {
                None => self.arg_types.last(),
                Some(_) => None,
            })
            .copied()
    }
}

const fn sig(
    name: &'static str,
    arg_types: &'static [ValueType],
    optional_args: usize,
    return_type: ValueType,
) -> FunctionSignature {
    FunctionSignature {
        name,
        arg_types,
        optional_args: Some(optional_args),
        return_type,
    }
}

const MATH: &[ValueType] = &[Vector];
const RANGE: &[ValueType] = &[Matrix];
const DATE: &[ValueType] = &[Vector];

static BUILTINS: &[FunctionSignature] = &[
    sig("abs", MATH, 0, Vector),
    sig("absent", MATH, 0, Vector),
    sig("absent_over_time", RANGE, 0, Vector),
    sig("acos", MATH, 0, Vector),
    sig("acosh", MATH, 0, Vector),
    sig("asin", MATH, 0, Vector),
    sig("asinh", MATH, 0, Vector),
    sig("atan", MATH, 0, Vector),
    sig("atanh", MATH, 0, Vector),
    sig("avg_over_time", RANGE, 0, Vector),
    sig("ceil", MATH, 0, Vector),
    sig("changes", RANGE, 0, Vector),
    sig("clamp", &[Vector, Scalar, Scalar], 0, Vector),
    sig("clamp_max", &[Vector, Scalar], 0, Vector),
    sig("clamp_min", &[Vector, Scalar], 0, Vector),
    sig("cos", MATH, 0, Vector),
    sig("cosh", MATH, 0, Vector),
    sig("count_over_time", RANGE, 0, Vector),
    sig("day_of_month", DATE, 1, Vector),
    sig("day_of_week", DATE, 1, Vector),
    sig("day_of_year", DATE, 1, Vector),
    sig("days_in_month", DATE, 1, Vector),
    sig("deg", MATH, 0, Vector),
    sig("delta", RANGE, 0, Vector),
    sig("deriv", RANGE, 0, Vector),
    sig("exp", MATH, 0, Vector),
    sig("floor", MATH, 0, Vector),
    sig("histogram_quantile", &[Scalar, Vector], 0, Vector),
    sig("holt_winters", &[Matrix, Scalar, Scalar], 0, Vector),
    sig("hour", DATE, 1, Vector),
    sig("idelta", RANGE, 0, Vector),
    sig("increase", RANGE, 0, Vector),
    sig("irate", RANGE, 0, Vector),
    FunctionSignature {
        name: "label_join",
        arg_types: &[Vector, Str, Str, Str],
        optional_args: None,
        return_type: Vector,
    },
    sig("label_replace", &[Vector, Str, Str, Str, Str], 0, Vector),
    sig("last_over_time", RANGE, 0, Vector),
    sig("ln", MATH, 0, Vector),
    sig("log10", MATH, 0, Vector),
    sig("log2", MATH, 0, Vector),
    sig("max_over_time", RANGE, 0, Vector),
    sig("min_over_time", RANGE, 0, Vector),
    sig("minute", DATE, 1, Vector),
    sig("month", DATE, 1, Vector),
    sig("pi", &[], 0, Scalar),
    sig("predict_linear", &[Matrix, Scalar], 0, Vector),
    sig("present_over_time", RANGE, 0, Vector),
    sig("quantile_over_time", &[Scalar, Matrix], 0, Vector),
    sig("rad", MATH, 0, Vector),
    sig("rate", RANGE, 0, Vector),
    sig("resets", RANGE, 0, Vector),
    sig("round", &[Vector, Scalar], 1, Vector),
    sig("scalar", &[Vector], 0, Scalar),
    sig("sgn", MATH, 0, Vector),
    sig("sin", MATH, 0, Vector),
    sig("sinh", MATH, 0, Vector),
    sig("sort", MATH, 0, Vector),
    sig("sort_desc", MATH, 0, Vector),
    sig("sqrt", MATH, 0, Vector),
    sig("stddev_over_time", RANGE, 0, Vector),
    sig("stdvar_over_time", RANGE, 0, Vector),
    sig("sum_over_time", RANGE, 0, Vector),
    sig("tan", MATH, 0, Vector),
    sig("tanh", MATH, 0, Vector),
    sig("time", &[], 0, Scalar),
    sig("timestamp", &[Vector], 0, Vector),
    sig("vector", &[Scalar], 0, Vector),
    sig("year", DATE, 1, Vector),
];

lazy_static! {
    static ref BY_NAME: HashMap<&'static str, &'static FunctionSignature> =
        BUILTINS.iter().map(|sig| (sig.name, sig)).collect();
}

/// Signature of the built-in called `name`, if the language defines one
pub fn lookup(name: &str) -> Option<&'static FunctionSignature> {
    BY_NAME.get(name).copied()
}

/// Whether `name` is a function of the language
pub fn is_builtin(name: &str) -> bool {
    BY_NAME.contains_key(name)
}

/// All built-in signatures, sorted by name
pub fn builtins() -> &'static [FunctionSignature] {
    BUILTINS
}
