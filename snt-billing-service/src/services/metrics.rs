//! Prometheus metrics for snt-billing-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Counter for HTTP requests by route and status.
pub static HTTP_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "snt_billing_http_requests_total",
        "Total number of HTTP API requests",
        &["method", "route", "status"]
    )
    .expect("Failed to register HTTP_REQUESTS")
});

/// Histogram for ledger operation duration.
pub static LEDGER_OPERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "snt_billing_ledger_operation_duration_seconds",
        "Ledger operation duration in seconds",
        &["operation"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register LEDGER_OPERATION_DURATION")
});

/// Counter for imported statement rows by outcome.
pub static IMPORT_ROWS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "snt_billing_import_rows_total",
        "Total number of statement rows processed by import",
        &["outcome"]
    )
    .expect("Failed to register IMPORT_ROWS")
});

/// Counter for matcher results.
pub static PAYMENT_MATCHES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "snt_billing_payment_matches_total",
        "Total number of plot matching attempts",
        &["status", "reason"]
    )
    .expect("Failed to register PAYMENT_MATCHES")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "snt_billing_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS);
    Lazy::force(&LEDGER_OPERATION_DURATION);
    Lazy::force(&IMPORT_ROWS);
    Lazy::force(&PAYMENT_MATCHES);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_http_request(method: &str, route: &str, status: u16) {
    let status = status.to_string();
    HTTP_REQUESTS
        .with_label_values(&[method, route, status.as_str()])
        .inc();
}

pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}

pub fn record_import_row(outcome: &str) {
    IMPORT_ROWS.with_label_values(&[outcome]).inc();
}

pub fn record_payment_match(status: &str, reason: &str) {
    PAYMENT_MATCHES.with_label_values(&[status, reason]).inc();
}
