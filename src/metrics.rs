use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;

use crate::App;

// Metrics live in the default registry: their identity is the exposition
// endpoint, so a process-wide registry is the correct scope.

pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "imgrelay_http_requests_total",
        "Total number of HTTP requests processed.",
        &["method", "status", "path"]
    )
    .expect("register imgrelay_http_requests_total")
});

pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "imgrelay_http_request_duration_seconds",
        "Duration of HTTP requests.",
        &["method", "status", "path"]
    )
    .expect("register imgrelay_http_request_duration_seconds")
});

pub static CACHE_OPS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "imgrelay_cache_ops_total",
        "Total number of cache operations by outcome.",
        &["type"]
    )
    .expect("register imgrelay_cache_ops_total")
});

pub static TRANSFORM_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "imgrelay_transform_duration_seconds",
        "Duration of transform pipeline runs."
    )
    .expect("register imgrelay_transform_duration_seconds")
});

pub static TRANSFORM_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "imgrelay_transform_errors_total",
        "Total number of transform pipeline errors."
    )
    .expect("register imgrelay_transform_errors_total")
});

pub static ORIGIN_FETCH_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "imgrelay_origin_fetch_duration_seconds",
        "Duration of origin object fetches."
    )
    .expect("register imgrelay_origin_fetch_duration_seconds")
});

pub fn record_cache_op(kind: &str) {
    CACHE_OPS_TOTAL.with_label_values(&[kind]).inc();
}

/// Text exposition of the default registry.
pub fn exposition() -> String {
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buf) {
        tracing::error!(error = %e, "metrics encode failed");
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}

/// Request-level counter/duration middleware. The asset route collapses to
/// one path label to keep cardinality flat.
pub async fn track_http(State(app): State<Arc<App>>, req: Request, next: Next) -> Response {
    if !app.config.snapshot().enable_metrics {
        return next.run(req).await;
    }

    let method = req.method().clone();
    let path_label = match req.uri().path() {
        "/health" => "/health",
        "/metrics" => "/metrics",
        _ => "/{asset}",
    };

    let start = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), &status, path_label])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[method.as_str(), &status, path_label])
        .observe(start.elapsed().as_secs_f64());

    response
}
