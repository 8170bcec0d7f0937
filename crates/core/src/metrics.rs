//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Dispatcher and rate limiter (dispatches per lane, degraded reservations)
//! - Pipeline (outcomes, durations, bytes stashed)
//! - Retry/cancel manager (cancels, retries, revocation failures)
//! - Remote repository calls

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Dispatch Metrics
// =============================================================================

/// Tasks enqueued total by lane.
pub static DISPATCHED_TASKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("curator_dispatched_tasks_total", "Total upload tasks enqueued"),
        &["lane"], // "uploads-privileged", "uploads-normal"
    )
    .unwrap()
});

/// Slot reservations that failed open because the slot store was unavailable.
pub static RATE_LIMITER_DEGRADED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "curator_rate_limiter_degraded_total",
        "Slot reservations served without the slot store",
    )
    .unwrap()
});

/// Delay between dispatch and the reserved slot, in seconds.
pub static SLOT_DELAY: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "curator_slot_delay_seconds",
            "Delay until the reserved upload slot",
        )
        .buckets(vec![0.0, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]),
        &["lane"],
    )
    .unwrap()
});

/// Tasks currently waiting in the queues.
pub static QUEUED_TASKS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("curator_queued_tasks", "Upload tasks waiting in the queues").unwrap()
});

// =============================================================================
// Pipeline Metrics
// =============================================================================

/// Pipeline runs total by terminal status.
pub static PIPELINE_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("curator_pipeline_outcomes_total", "Total pipeline runs by outcome"),
        &["status"],
    )
    .unwrap()
});

/// Pipeline run duration in seconds.
pub static PIPELINE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("curator_pipeline_duration_seconds", "Duration of pipeline runs")
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["status"],
    )
    .unwrap()
});

/// Bytes uploaded into the remote stash.
pub static BYTES_STASHED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("curator_bytes_stashed_total", "Total bytes uploaded in chunks").unwrap()
});

/// Tasks skipped because their request was no longer queued.
pub static STALE_TASKS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "curator_stale_tasks_total",
        "Tasks dropped because their request was cancelled or already taken",
    )
    .unwrap()
});

// =============================================================================
// Retry/Cancel Metrics
// =============================================================================

/// Requests cancelled total.
pub static REQUESTS_CANCELLED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("curator_requests_cancelled_total", "Total requests cancelled").unwrap()
});

/// Requests copied for retry, by path.
pub static REQUESTS_RETRIED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("curator_requests_retried_total", "Total failed requests retried"),
        &["path"], // "batch", "selection"
    )
    .unwrap()
});

/// Task revocations that did not reach the queue.
pub static REVOCATION_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "curator_revocation_failures_total",
        "Cancelled requests whose queued task could not be revoked",
    )
    .unwrap()
});

// =============================================================================
// Remote Metrics
// =============================================================================

/// Remote repository calls by operation and result.
pub static REMOTE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("curator_remote_requests_total", "Total remote repository calls"),
        &["operation", "result"], // result: "success", "transient", "rejected", "protocol"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Dispatch
        Box::new(DISPATCHED_TASKS.clone()),
        Box::new(RATE_LIMITER_DEGRADED.clone()),
        Box::new(SLOT_DELAY.clone()),
        Box::new(QUEUED_TASKS.clone()),
        // Pipeline
        Box::new(PIPELINE_OUTCOMES.clone()),
        Box::new(PIPELINE_DURATION.clone()),
        Box::new(BYTES_STASHED.clone()),
        Box::new(STALE_TASKS.clone()),
        // Retry/cancel
        Box::new(REQUESTS_CANCELLED.clone()),
        Box::new(REQUESTS_RETRIED.clone()),
        Box::new(REVOCATION_FAILURES.clone()),
        // Remote
        Box::new(REMOTE_REQUESTS.clone()),
    ]
}
