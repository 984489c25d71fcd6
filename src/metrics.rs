//! Metrics for cache refresh and execution
//!
//! Prometheus-compatible metrics tagged by namespace, plus a text-format
//! exporter for whatever HTTP surface sits above the engine.

use lazy_static::lazy_static;
use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, Encoder, GaugeVec,
    HistogramVec, IntCounterVec, TextEncoder,
};

lazy_static! {
    /// Unix timestamp of the last successful refresh per namespace
    static ref CACHE_REFRESH_LAST_TIME: GaugeVec = register_gauge_vec!(
        "ruleflow_cache_refresh_last_time",
        "Unix timestamp of the last successful snapshot refresh",
        &["namespace"]
    ).unwrap();

    /// Staleness of the cached snapshot per namespace
    static ref CACHE_REFRESH_STALENESS: GaugeVec = register_gauge_vec!(
        "ruleflow_cache_refresh_staleness_seconds",
        "Seconds since the last successful snapshot refresh",
        &["namespace"]
    ).unwrap();

    /// Counter for refresh failures
    static ref CACHE_REFRESH_ERRORS: IntCounterVec = register_int_counter_vec!(
        "ruleflow_cache_refresh_errors_total",
        "Total number of failed snapshot refreshes",
        &["namespace"]
    ).unwrap();

    /// Histogram for snapshot rebuild duration
    static ref CACHE_REFRESH_DURATION: HistogramVec = register_histogram_vec!(
        "ruleflow_cache_refresh_duration_seconds",
        "Snapshot rebuild duration in seconds",
        &["namespace"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).unwrap();

    /// Histogram for rule/workflow execution duration
    static ref EXECUTION_DURATION: HistogramVec = register_histogram_vec!(
        "ruleflow_execution_duration_seconds",
        "Rule or workflow execution duration in seconds",
        &["namespace", "kind"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    ).unwrap();

    /// Counter for execution failures
    static ref EXECUTION_ERRORS: IntCounterVec = register_int_counter_vec!(
        "ruleflow_execution_errors_total",
        "Total number of failed executions",
        &["namespace", "kind"]
    ).unwrap();

    /// Counter for circuit breaker transitions
    static ref BREAKER_TRANSITIONS: IntCounterVec = register_int_counter_vec!(
        "ruleflow_circuit_breaker_transitions_total",
        "Circuit breaker state transitions",
        &["from_state", "to_state"]
    ).unwrap();
}

/// Record a successful snapshot refresh.
pub fn record_refresh(namespace: &str, unix_time: f64, duration_secs: f64) {
    CACHE_REFRESH_LAST_TIME
        .with_label_values(&[namespace])
        .set(unix_time);
    CACHE_REFRESH_STALENESS
        .with_label_values(&[namespace])
        .set(0.0);
    CACHE_REFRESH_DURATION
        .with_label_values(&[namespace])
        .observe(duration_secs);
}

/// Record the current staleness for a namespace.
pub fn record_staleness(namespace: &str, staleness_secs: f64) {
    CACHE_REFRESH_STALENESS
        .with_label_values(&[namespace])
        .set(staleness_secs);
}

/// Record a failed refresh.
pub fn record_refresh_error(namespace: &str) {
    CACHE_REFRESH_ERRORS.with_label_values(&[namespace]).inc();
}

/// Record one execution, successful or not.
pub fn record_execution(namespace: &str, kind: &str, success: bool, duration_secs: f64) {
    EXECUTION_DURATION
        .with_label_values(&[namespace, kind])
        .observe(duration_secs);
    if !success {
        EXECUTION_ERRORS.with_label_values(&[namespace, kind]).inc();
    }
}

/// Record a circuit breaker state transition.
pub fn record_breaker_transition(from: &str, to: &str) {
    BREAKER_TRANSITIONS.with_label_values(&[from, to]).inc();
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("failed to encode metrics: {e}"))?;

    String::from_utf8(buffer).map_err(|e| format!("metrics are not valid UTF-8: {e}").into())
}
