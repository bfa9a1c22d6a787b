//! Prometheus metrics for engagement-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Workflow transitions by action and result.
pub static WORKFLOW_TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "engagement_workflow_transitions_total",
        "Workflow actions by action and result",
        &["action", "result"]
    )
    .expect("Failed to register workflow_transitions_total")
});

/// Emails by template and outcome.
pub static EMAILS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "engagement_emails_total",
        "Transactional emails by template and outcome",
        &["template", "outcome"] // sent, failed, timeout
    )
    .expect("Failed to register emails_total")
});

/// Payment webhook events by type and outcome.
pub static PAYMENT_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "engagement_payment_events_total",
        "Payment provider events by type and outcome",
        &["event_type", "outcome"]
    )
    .expect("Failed to register payment_events_total")
});

/// Outbox jobs by kind and outcome.
pub static OUTBOX_JOBS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "engagement_outbox_jobs_total",
        "Deferred jobs run by the outbox worker",
        &["job", "outcome"]
    )
    .expect("Failed to register outbox_jobs_total")
});

/// Numbering collisions that forced a retry.
pub static NUMBERING_RETRIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "engagement_numbering_retries_total",
        "Document number collisions by document kind",
        &["kind"]
    )
    .expect("Failed to register numbering_retries_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "engagement_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Printable render duration histogram.
pub static RENDER_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "engagement_render_duration_seconds",
        "Printable document render duration in seconds",
        &["document"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .expect("Failed to register render_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&WORKFLOW_TRANSITIONS_TOTAL);
    Lazy::force(&EMAILS_TOTAL);
    Lazy::force(&PAYMENT_EVENTS_TOTAL);
    Lazy::force(&OUTBOX_JOBS_TOTAL);
    Lazy::force(&NUMBERING_RETRIES_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&RENDER_DURATION);
}

pub fn record_transition(action: &str, result: &str) {
    WORKFLOW_TRANSITIONS_TOTAL
        .with_label_values(&[action, result])
        .inc();
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
