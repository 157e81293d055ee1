//! Prometheus metrics for the sitemap service.
//!
//! The `/metrics` endpoint is unauthenticated and only mounted when
//! `server.metrics_enabled` is set. Metrics carry entity kinds and sweep
//! names as labels, never URLs or file names.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// File metrics
pub static SITEMAP_FILES_CREATED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sitemaps_leaf_files_created_total",
            "Leaf sitemap files created, by entity kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static SITEMAP_FILES_UPDATED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sitemaps_leaf_files_updated_total",
            "Leaf sitemap files rewritten, by entity kind and operation",
        ),
        &["kind", "operation"],
    )
    .expect("metric creation failed")
});

pub static INDEX_FILES_CREATED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sitemaps_index_files_created_total",
            "Sitemap index files created, by entity kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static ROBOTS_LINKS_APPENDED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sitemaps_robots_links_appended_total",
        "Sitemap directives appended to robots.txt",
    )
    .expect("metric creation failed")
});

// Coordination metrics
pub static LOCK_CONTENTION: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sitemaps_lock_contention_total",
        "Lock acquisitions rejected because another worker holds the lease",
    )
    .expect("metric creation failed")
});

pub static SWEEP_GROUPS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sitemaps_sweep_groups_total",
            "Sweep groups processed, by sweep and outcome",
        ),
        &["sweep", "outcome"],
    )
    .expect("metric creation failed")
});

pub static SWEEP_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new("sitemaps_sweep_duration_seconds", "Time taken by one sweep")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["sweep"],
    )
    .expect("metric creation failed")
});

// Ingestion metrics
pub static EVENTS_INGESTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sitemaps_events_ingested_total",
            "Upstream link events, by event type and outcome",
        ),
        &["event_type", "outcome"],
    )
    .expect("metric creation failed")
});

pub static NOTIFICATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sitemaps_crawler_notifications_total",
            "Crawler pings sent after a leaf file changed, by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests can build several routers in one process.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(SITEMAP_FILES_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SITEMAP_FILES_UPDATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(INDEX_FILES_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ROBOTS_LINKS_APPENDED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(LOCK_CONTENTION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SWEEP_GROUPS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SWEEP_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(EVENTS_INGESTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(NOTIFICATIONS.clone()))
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

/// Record the outcome of one sweep group.
pub fn record_sweep_group(sweep: &str, outcome: &str) {
    SWEEP_GROUPS.with_label_values(&[sweep, outcome]).inc();
}
