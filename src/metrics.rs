//! Metrics and telemetry for the query engine
//!
//! Prometheus metrics covering series resolution, batch flow through the
//! operator tree, function evaluation and query failures. Metrics are
//! registered in the default registry on first use.

use crate::error::Error;
use crate::query::error::QueryErrorKind;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // === Series Resolution ===

    /// Series selector resolutions by outcome
    pub static ref SERIES_RESOLUTIONS_TOTAL: CounterVec = register_counter_vec!(
        "promql_series_resolutions_total",
        "Total series selector resolutions by status",
        &["status"]
    ).unwrap();

    /// Series materialized by selector resolutions
    pub static ref SERIES_RESOLVED_TOTAL: Counter = register_counter!(
        "promql_series_resolved_total",
        "Total series resolved from storage"
    ).unwrap();

    /// Time spent resolving matchers against storage
    pub static ref RESOLUTION_DURATION: Histogram = register_histogram!(
        "promql_resolution_duration_seconds",
        "Series resolution latency in seconds",
        vec![0.0001, 0.001, 0.01, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // === Execution ===

    /// Batches produced per operator kind
    pub static ref BATCHES_TOTAL: CounterVec = register_counter_vec!(
        "promql_batches_total",
        "Total step-vector batches produced by operator",
        &["operator"]
    ).unwrap();

    /// Kernel invocations per function
    pub static ref FUNCTION_CALLS_TOTAL: CounterVec = register_counter_vec!(
        "promql_function_calls_total",
        "Total function kernel invocations",
        &["function"]
    ).unwrap();

    /// Query execution latency
    pub static ref QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "promql_query_duration_seconds",
        "Query execution latency in seconds",
        &["mode"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).unwrap();

    // === Errors ===

    /// Failed queries by error kind
    pub static ref QUERY_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "promql_query_errors_total",
        "Total failed queries by error kind",
        &["kind"]
    ).unwrap();
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| Error::Serialization(format!("Failed to encode metrics: {}", e)))?;

    String::from_utf8(buffer)
        .map_err(|e| Error::Serialization(format!("Metrics contain invalid UTF-8: {}", e)))
}

/// Record one series selector resolution
#[inline]
pub fn record_resolution(duration_secs: f64, series: usize, success: bool) {
    let status = if success { "success" } else { "error" };
    SERIES_RESOLUTIONS_TOTAL.with_label_values(&[status]).inc();
    RESOLUTION_DURATION.observe(duration_secs);
    if success {
        SERIES_RESOLVED_TOTAL.inc_by(series as f64);
    }
}

/// Record one batch leaving an operator
#[inline]
pub fn record_batch(operator: &str) {
    BATCHES_TOTAL.with_label_values(&[operator]).inc();
}

/// Record kernel invocations for a function
#[inline]
pub fn record_function_calls(function: &str, calls: usize) {
    if calls > 0 {
        FUNCTION_CALLS_TOTAL
            .with_label_values(&[function])
            .inc_by(calls as f64);
    }
}

/// Record a completed query
#[inline]
pub fn record_query(mode: &str, duration_secs: f64) {
    QUERY_DURATION.with_label_values(&[mode]).observe(duration_secs);
}

/// Record a failed query
#[inline]
pub fn record_query_error(kind: QueryErrorKind) {
    QUERY_ERRORS_TOTAL.with_label_values(&[kind.as_str()]).inc();
}
