//! Prometheus metrics for the HTTP server.
//!
//! This module provides metrics for:
//! - HTTP requests (duration, count, in-flight, auth failures)
//! - WebSocket connections (active, total, messages, lag)
//! - Batch and worker state, refreshed on every scrape
//!
//! Core metrics (dispatcher, pipeline, manager, remote calls) are registered
//! from `curator_core::metrics`.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Metrics
// =============================================================================

/// HTTP request duration histogram.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "curator_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// Total HTTP requests counter.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("curator_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// Currently in-flight HTTP requests.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "curator_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

/// Authentication failures.
pub static AUTH_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("curator_auth_failures_total", "Total authentication failures"),
        &["reason"],
    )
    .unwrap()
});

// =============================================================================
// WebSocket Metrics
// =============================================================================

pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "curator_ws_connections_active",
        "Number of active WebSocket connections",
    )
    .unwrap()
});

pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "curator_ws_connections_total",
        "Total WebSocket connections since startup",
    )
    .unwrap()
});

/// Client messages received, by type.
pub static WS_MESSAGES_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "curator_ws_messages_received_total",
            "WebSocket messages received",
        ),
        &["type"],
    )
    .unwrap()
});

/// Server messages sent, by type.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("curator_ws_messages_sent_total", "WebSocket messages sent"),
        &["type"],
    )
    .unwrap()
});

/// Connections that fell behind the update stream and were resynced.
pub static WS_LAG_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "curator_ws_lag_events_total",
        "WebSocket lag events (client fell behind)",
    )
    .unwrap()
});

// =============================================================================
// Worker Metrics
// =============================================================================

pub static WORKERS_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "curator_workers_running",
        "Whether the upload workers are running (1) or stopped (0)",
    )
    .unwrap()
});

pub static WORKERS_BUSY: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("curator_workers_busy", "Workers currently running a pipeline").unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP metrics
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(AUTH_FAILURES_TOTAL.clone()))
        .unwrap();

    // WebSocket metrics
    registry
        .register(Box::new(WS_CONNECTIONS_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_CONNECTIONS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_MESSAGES_RECEIVED.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_MESSAGES_SENT.clone()))
        .unwrap();
    registry.register(Box::new(WS_LAG_EVENTS.clone())).unwrap();

    // Worker metrics
    registry
        .register(Box::new(WORKERS_RUNNING.clone()))
        .unwrap();
    registry.register(Box::new(WORKERS_BUSY.clone())).unwrap();

    // Core metrics (dispatcher, pipeline, manager, remote calls)
    for metric in curator_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Collect dynamic metrics from current application state.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let status = state.workers().status().await;
    WORKERS_RUNNING.set(if status.running { 1 } else { 0 });
    WORKERS_BUSY.set(status.busy as i64);
}

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if is_numeric_id(segment) || is_uuid(segment) {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_numeric_id(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

fn is_uuid(segment: &str) -> bool {
    segment.len() == 36
        && segment.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}
