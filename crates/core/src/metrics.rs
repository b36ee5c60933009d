//! Prometheus metrics for the orchestration engine.

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts};

/// Batches handed out to annotators.
pub static BATCHES_ASSIGNED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "labelhub_batches_assigned_total",
        "Total batches assigned to annotators",
    )
    .unwrap()
});

/// Batch submissions by result.
pub static SUBMISSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("labelhub_submissions_total", "Total batch submissions"),
        &["result"], // "accepted", "mismatch"
    )
    .unwrap()
});

/// Work items that reached the finished state.
pub static ITEMS_FINISHED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "labelhub_items_finished_total",
        "Total work items finished",
    )
    .unwrap()
});

/// Automated runs started.
pub static RUNS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("labelhub_runs_started_total", "Total automated runs started").unwrap()
});

/// Automated run outcomes.
pub static RUN_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("labelhub_run_outcomes_total", "Automated run outcomes"),
        &["outcome"], // "finished", "paused", "failed"
    )
    .unwrap()
});

/// Progress events published to subscribers.
pub static EVENTS_PUBLISHED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "labelhub_events_published_total",
        "Total progress events published",
    )
    .unwrap()
});

/// Subscribers dropped for falling behind or disconnecting.
pub static SUBSCRIBERS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "labelhub_subscribers_dropped_total",
        "Subscribers dropped by the broadcaster",
    )
    .unwrap()
});

/// Currently registered progress subscribers.
pub static SUBSCRIBERS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "labelhub_subscribers_active",
        "Currently registered progress subscribers",
    )
    .unwrap()
});

/// Get all engine metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(BATCHES_ASSIGNED.clone()),
        Box::new(SUBMISSIONS.clone()),
        Box::new(ITEMS_FINISHED.clone()),
        Box::new(RUNS_STARTED.clone()),
        Box::new(RUN_OUTCOMES.clone()),
        Box::new(EVENTS_PUBLISHED.clone()),
        Box::new(SUBSCRIBERS_DROPPED.clone()),
        Box::new(SUBSCRIBERS_ACTIVE.clone()),
    ]
}
