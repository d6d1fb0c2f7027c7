//! Core data types used throughout the query engine
//!
//! This module defines the fundamental data structures shared by the storage
//! interface, the series selector and the operators:
//!
//! # Key Types
//!
//! - **`Point`**: A single sample (timestamp in milliseconds + value)
//! - **`Labels`**: The ordered, deduplicated label set identifying a series
//! - **`LabelMatcher`**: A single `name op value` selection predicate
//! - **`TimeRange`**: Inclusive time window for storage queries
//!
//! # Example
//!
//! ```rust
//! use promql_exec::types::{Labels, LabelMatcher, MatchOp, Point};
//!
//! let labels = Labels::from_pairs([("__name__", "http_requests_total"), ("job", "api")]);
//! assert_eq!(labels.drop_metric_name().len(), 1);
//!
//! let matcher = LabelMatcher::new(MatchOp::Regex, "job", "api|web").unwrap();
//! assert!(matcher.matches(&labels));
//!
//! let point = Point::new(1000, 42.5);
//! assert!(!point.is_invalid());
//! ```

use crate::error::Error;
use regex::Regex;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Reserved label holding the metric name
pub const METRIC_NAME: &str = "__name__";

// ============================================================================
// Point
// ============================================================================

/// A single (timestamp, value) sample
///
/// Timestamps are milliseconds since the UNIX epoch. NaN is a valid value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Timestamp in milliseconds
    pub t: i64,
    /// Sample value
    pub v: f64,
}

impl Point {
    /// Sentinel returned by function kernels to suppress an output sample
    pub const INVALID: Point = Point { t: -1, v: 0.0 };

    /// Create a new point
    pub fn new(t: i64, v: f64) -> Self {
        Self { t, v }
    }

    /// Whether this point is the "suppress this sample" sentinel
    #[inline]
    pub fn is_invalid(&self) -> bool {
        self.t == Self::INVALID.t
    }
}

// ============================================================================
// Labels
// ============================================================================

/// A single label name/value pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    /// Label name
    pub name: String,
    /// Label value
    pub value: String,
}

impl Label {
    /// Create a new label
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Immutable label set identifying one time series
///
/// Labels are kept sorted by name with duplicate names removed (first
/// occurrence wins), so two sets with the same pairs always compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Labels(Vec<Label>);

impl Labels {
    /// Create an empty label set
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Create a label set from labels, sorting and deduplicating by name
    pub fn new(mut labels: Vec<Label>) -> Self {
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        labels.dedup_by(|b, a| a.name == b.name);
        Self(labels)
    }

    /// Create a label set from `(name, value)` pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| Label::new(k, v))
                .collect(),
        )
    }

    /// Value of the label with the given name, if present
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    /// The metric name, if present
    pub fn metric_name(&self) -> Option<&str> {
        self.get(METRIC_NAME)
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set has no labels
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over labels in name order
    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    /// Return a copy without the metric name label
    ///
    /// No-op (plain copy) if the set has no metric name. Remaining labels keep
    /// their relative order.
    pub fn drop_metric_name(&self) -> Labels {
        Labels(
            self.0
                .iter()
                .filter(|l| l.name != METRIC_NAME)
                .cloned()
                .collect(),
        )
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", label.name, label.value)?;
        }
        write!(f, "}}")
    }
}

impl Serialize for Labels {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for label in &self.0 {
            map.serialize_entry(&label.name, &label.value)?;
        }
        map.end()
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ============================================================================
// Label Matchers
// ============================================================================

/// Comparison performed by a [`LabelMatcher`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchOp {
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `=~` (fully anchored regex)
    Regex,
    /// `!~` (fully anchored regex)
    NotRegex,
}

impl fmt::Display for MatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchOp::Equal => write!(f, "="),
            MatchOp::NotEqual => write!(f, "!="),
            MatchOp::Regex => write!(f, "=~"),
            MatchOp::NotRegex => write!(f, "!~"),
        }
    }
}

/// A single label selection predicate such as `job=~"api|web"`
///
/// A label missing from a series is matched as the empty string.
#[derive(Debug, Clone)]
pub struct LabelMatcher {
    /// Label name to test
    pub name: String,
    /// Comparison operator
    pub op: MatchOp,
    /// Literal value or regex source
    pub value: String,
    regex: Option<Regex>,
}

impl LabelMatcher {
    /// Create a matcher, compiling the regex for regex operators
    pub fn new(
        op: MatchOp,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, Error> {
        let name = name.into();
        let value = value.into();
        let regex = match op {
            MatchOp::Regex | MatchOp::NotRegex => {
                let regex = Regex::new(&format!("^(?:{})$", value)).map_err(|e| {
                    Error::InvalidMatcher(format!("{}{}{:?}: {}", name, op, value, e))
                })?;
                Some(regex)
            }
            MatchOp::Equal | MatchOp::NotEqual => None,
        };
        Ok(Self {
            name,
            op,
            value,
            regex,
        })
    }

    /// Shorthand for an equality matcher on the metric name
    pub fn metric(name: impl Into<String>) -> Self {
        Self {
            name: METRIC_NAME.to_string(),
            op: MatchOp::Equal,
            value: name.into(),
            regex: None,
        }
    }

    /// Test a single label value
    pub fn matches_value(&self, value: &str) -> bool {
        match (self.op, &self.regex) {
            (MatchOp::Equal, _) => value == self.value,
            (MatchOp::NotEqual, _) => value != self.value,
            (MatchOp::Regex, Some(re)) => re.is_match(value),
            (MatchOp::NotRegex, Some(re)) => !re.is_match(value),
            // Regex operators always carry a compiled regex
            (MatchOp::Regex | MatchOp::NotRegex, None) => false,
        }
    }

    /// Test a label set
    pub fn matches(&self, labels: &Labels) -> bool {
        self.matches_value(labels.get(&self.name).unwrap_or(""))
    }
}

impl PartialEq for LabelMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.op == other.op && self.value == other.value
    }
}

impl Eq for LabelMatcher {}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.op, self.value)
    }
}

// ============================================================================
// Time Range
// ============================================================================

/// Time range for storage queries (milliseconds, both ends inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp in milliseconds (inclusive)
    pub start: i64,

    /// End timestamp in milliseconds (inclusive)
    pub end: i64,
}

impl TimeRange {
    /// Create a new time range, rejecting `start > end`
    ///
    /// ```rust
    /// use promql_exec::types::TimeRange;
    ///
    /// let range = TimeRange::new(1000, 2000).unwrap();
    /// assert!(range.contains(2000));
    /// assert!(TimeRange::new(2000, 1000).is_err());
    /// ```
    pub fn new(start: i64, end: i64) -> Result<Self, Error> {
        if start > end {
            return Err(Error::Configuration(format!(
                "Invalid time range: start {} > end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Check if a timestamp falls within this range (inclusive)
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    /// Duration of this range in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
