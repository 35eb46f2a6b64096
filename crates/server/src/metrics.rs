//! Prometheus metrics for the ember server.
//!
//! Exposes counters for instance reuse, creation races, provisioning and
//! lease extension, and for the in-process event transport.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no project names or instance IDs, only aggregate counts.
//! Restrict it to scraper networks at the infrastructure level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Coordinator metrics
pub static INSTANCES_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ember_instances_created_total",
        "Total number of inference instances inserted",
    )
    .expect("metric creation failed")
});

pub static INSTANCES_REUSED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ember_instances_reused_total",
        "Total number of create requests answered with an existing instance",
    )
    .expect("metric creation failed")
});

pub static CREATION_CONFLICTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ember_creation_conflicts_total",
        "Total number of lost insert races absorbed by re-reading",
    )
    .expect("metric creation failed")
});

// Consumer metrics
pub static PROVISIONING_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ember_provisioning_failures_total",
        "Total number of backend allocations recorded as failed",
    )
    .expect("metric creation failed")
});

pub static EXTENSIONS_PERFORMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ember_extensions_performed_total",
        "Total number of lease extensions applied",
    )
    .expect("metric creation failed")
});

pub static EXTENSIONS_SKIPPED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ember_extensions_skipped_total",
            "Total number of extension requests dropped by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

// Transport metrics
pub static PUBLISH_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ember_publish_failures_total",
            "Total number of lifecycle events that could not be published",
        ),
        &["event"],
    )
    .expect("metric creation failed")
});

pub static HANDLER_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ember_handler_failures_total",
            "Total number of lifecycle events dropped after exhausting redelivery",
        ),
        &["event"],
    )
    .expect("metric creation failed")
});

pub static HANDLER_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "ember_handler_duration_seconds",
            "Time taken to handle one delivery of a lifecycle event",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["event"],
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Safe to call more than once; only the first call registers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(INSTANCES_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(INSTANCES_REUSED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CREATION_CONFLICTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PROVISIONING_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(EXTENSIONS_PERFORMED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(EXTENSIONS_SKIPPED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PUBLISH_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(HANDLER_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(HANDLER_DURATION.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record an extension request dropped without a backend extend call.
pub fn record_extension_skipped(reason: &str) {
    EXTENSIONS_SKIPPED.with_label_values(&[reason]).inc();
}
