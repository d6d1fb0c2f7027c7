//! Query result types and formatters
//!
//! A drained operator tree becomes a [`QueryResult`]: one [`ResultSeries`]
//! per output label set, holding the samples in step order. Results render to
//! JSON (matrix layout with second-precision timestamps and string values)
//! and CSV.

use crate::types::{Labels, Point};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Query Result Types
// ============================================================================

/// Complete query result with data and metadata
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    /// Query execution metadata
    pub metadata: ResultMetadata,

    /// Output series in output order
    #[serde(rename = "result")]
    pub series: Vec<ResultSeries>,
}

impl QueryResult {
    /// Create an empty result
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a result from series; series without samples are dropped
    pub fn from_series(series: Vec<ResultSeries>) -> Self {
        let series: Vec<ResultSeries> = series.into_iter().filter(|s| !s.is_empty()).collect();
        Self {
            metadata: ResultMetadata {
                series_count: series.len(),
                sample_count: series.iter().map(|s| s.points.len()).sum(),
                ..Default::default()
            },
            series,
        }
    }

    /// Set execution time metadata
    pub fn with_execution_time(mut self, duration: Duration) -> Self {
        self.metadata.execution_time_us = duration.as_micros() as u64;
        self
    }

    /// Set the number of batches pulled from the root operator
    pub fn with_batches(mut self, batches: u64) -> Self {
        self.metadata.batches = batches;
        self
    }

    /// Check if result has no series
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Total number of samples across all series
    pub fn sample_count(&self) -> usize {
        self.metadata.sample_count
    }

    /// Series with exactly these labels
    pub fn find(&self, labels: &Labels) -> Option<&ResultSeries> {
        self.series.iter().find(|s| &s.labels == labels)
    }

    /// Append the series of another (shard) result, keeping order
    pub fn extend(&mut self, other: QueryResult) {
        self.metadata.series_count += other.metadata.series_count;
        self.metadata.sample_count += other.metadata.sample_count;
        self.metadata.batches += other.metadata.batches;
        self.metadata.warnings.extend(other.metadata.warnings);
        self.series.extend(other.series);
    }

    /// Format result to string
    pub fn format(&self, format: ResultFormat) -> String {
        match format {
            ResultFormat::Json => self.to_json(),
            ResultFormat::JsonPretty => self.to_json_pretty(),
            ResultFormat::Csv => self.to_csv(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Convert to pretty-printed JSON string
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Convert to CSV string, one row per sample
    ///
    /// Labels are rendered in their display form and quoted.
    pub fn to_csv(&self) -> String {
        let mut output = String::from("labels,timestamp,value\n");
        for series in &self.series {
            let labels = series.labels.to_string().replace('"', "\"\"");
            for p in &series.points {
                output.push_str(&format!("\"{}\",{},{}\n", labels, p.t, format_value(p.v)));
            }
        }
        output
    }
}

/// Samples of one output series
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSeries {
    /// Output label set
    pub labels: Labels,

    /// Samples in step order; NaN values are kept
    pub points: Vec<Point>,
}

impl ResultSeries {
    /// Create a series without samples
    pub fn new(labels: Labels) -> Self {
        Self {
            labels,
            points: Vec::new(),
        }
    }

    /// Add a sample
    pub fn push(&mut self, t: i64, v: f64) {
        self.points.push(Point::new(t, v));
    }

    /// Whether the series has no samples
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl Serialize for ResultSeries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let values: Vec<(f64, String)> = self
            .points
            .iter()
            .map(|p| (p.t as f64 / 1000.0, format_value(p.v)))
            .collect();
        let mut state = serializer.serialize_struct("ResultSeries", 2)?;
        state.serialize_field("metric", &self.labels)?;
        state.serialize_field("values", &values)?;
        state.end()
    }
}

/// Render a sample value the way the HTTP API does (`NaN`, `+Inf`, `-Inf`)
pub fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "+Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        v.to_string()
    }
}

// ============================================================================
// Result Metadata
// ============================================================================

/// Query result metadata
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultMetadata {
    /// Number of series in result
    pub series_count: usize,

    /// Number of samples in result
    pub sample_count: usize,

    /// Query execution time in microseconds
    pub execution_time_us: u64,

    /// Batches pulled from the root operator(s)
    #[serde(skip_serializing_if = "is_zero")]
    pub batches: u64,

    /// Warning messages
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl ResultMetadata {
    /// Add a warning message
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

// ============================================================================
// Result Format
// ============================================================================

/// Output format for query results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultFormat {
    /// Compact JSON
    #[default]
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// CSV format
    Csv,
}

impl fmt::Display for ResultFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultFormat::Json => write!(f, "json"),
            ResultFormat::JsonPretty => write!(f, "json-pretty"),
            ResultFormat::Csv => write!(f, "csv"),
        }
    }
}

impl std::str::FromStr for ResultFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ResultFormat::Json),
            "json-pretty" | "jsonpretty" => Ok(ResultFormat::JsonPretty),
            "csv" => Ok(ResultFormat::Csv),
            _ => Err(format!("unknown format: {}", s)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn series(name: &str, points: &[(i64, f64)]) -> ResultSeries {
        let mut s = ResultSeries::new(Labels::from_pairs([("job", name)]));
        for (t, v) in points {
            s.push(*t, *v);
        }
        s
    }

    #[test]
    fn test_from_series_drops_empty() {
        let result = QueryResult::from_series(vec![
            series("a", &[(1000, 1.0), (2000, 2.0)]),
            series("b", &[]),
        ]);
        assert_eq!(result.series.len(), 1);
        assert_eq!(result.metadata.series_count, 1);
        assert_eq!(result.sample_count(), 2);
        assert!(result.find(&Labels::from_pairs([("job", "a")])).is_some());
    }

    #[test]
    fn test_query_result_json() {
        let result =
            QueryResult::from_series(vec![series("api", &[(1500, 42.5), (3000, f64::NAN)])]);

        let json: serde_json::Value = serde_json::from_str(&result.to_json()).unwrap();
        let first = &json["result"][0];
        assert_eq!(first["metric"]["job"], "api");
        assert_eq!(first["values"][0][0], 1.5);
        assert_eq!(first["values"][0][1], "42.5");
        assert_eq!(first["values"][1][1], "NaN");
        assert_eq!(json["metadata"]["sample_count"], 2);
    }

    #[test]
    fn test_query_result_csv() {
        let result =
            QueryResult::from_series(vec![series("api", &[(1000, 42.5), (2000, f64::INFINITY)])]);

        let csv = result.to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "labels,timestamp,value");
        assert_eq!(lines[1], "\"{job=\"\"api\"\"}\",1000,42.5");
        assert_eq!(lines[2], "\"{job=\"\"api\"\"}\",2000,+Inf");
    }

    #[test]
    fn test_extend_keeps_order() {
        let mut result = QueryResult::from_series(vec![series("a", &[(0, 1.0)])]);
        result.extend(QueryResult::from_series(vec![series("b", &[(0, 2.0), (1, 3.0)])]));
        assert_eq!(result.metadata.series_count, 2);
        assert_eq!(result.sample_count(), 3);
        assert_eq!(result.series[1].labels.get("job"), Some("b"));
    }

    #[test]
    fn test_result_format_parsing() {
        assert_eq!("json".parse::<ResultFormat>().unwrap(), ResultFormat::Json);
        assert_eq!("CSV".parse::<ResultFormat>().unwrap(), ResultFormat::Csv);
        assert!("table".parse::<ResultFormat>().is_err());
    }
}
