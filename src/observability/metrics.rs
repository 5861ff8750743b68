//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `maintenance_admission_reconciliations_total{outcome}` - Reconciliations by outcome
//! - `maintenance_admission_reconciliation_errors_total{kind}` - Failed reconciliations by error kind
//! - `maintenance_admission_reconciliation_duration_seconds` - Duration of reconciliations
//! - `maintenance_admission_approvals_total` - Approval annotations written
//! - `maintenance_admission_requeues_total` - Keys re-queued with backoff
//! - `maintenance_admission_dropped_keys_total{reason}` - Keys abandoned by the retry policy
//! - `maintenance_admission_queue_depth` - Keys waiting in the work queue
//! - `maintenance_admission_unavailable_units` - Unavailable units seen by the last budget check

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "maintenance_admission_reconciliations_total",
            "Total number of successful reconciliations by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "maintenance_admission_reconciliation_errors_total",
            "Total number of failed reconciliations by error kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "maintenance_admission_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static APPROVALS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "maintenance_admission_approvals_total",
        "Total number of units admitted into maintenance",
    )
    .expect("Failed to create APPROVALS_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "maintenance_admission_requeues_total",
        "Total number of keys re-queued with backoff after a failed reconciliation",
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static DROPPED_KEYS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "maintenance_admission_dropped_keys_total",
            "Total number of keys dropped by the retry policy",
        ),
        &["reason"],
    )
    .expect("Failed to create DROPPED_KEYS_TOTAL metric - this should never happen")
});

static QUEUE_DEPTH: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "maintenance_admission_queue_depth",
        "Number of keys waiting in the work queue",
    )
    .expect("Failed to create QUEUE_DEPTH metric - this should never happen")
});

static UNAVAILABLE_UNITS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "maintenance_admission_unavailable_units",
        "Unavailable units counted by the most recent admission budget check",
    )
    .expect("Failed to create UNAVAILABLE_UNITS metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
/// Register every controller metric with the shared registry
///
/// Fails if called twice in the same process.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(APPROVALS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DROPPED_KEYS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUEUE_DEPTH.clone()))?;
    REGISTRY.register(Box::new(UNAVAILABLE_UNITS.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(outcome: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_approvals() {
    APPROVALS_TOTAL.inc();
}

pub fn increment_requeues() {
    REQUEUES_TOTAL.inc();
}

/// Record a key abandoned by the retry policy (`exhausted` or `non_retryable`)
pub fn increment_dropped_keys(reason: &str) {
    DROPPED_KEYS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn set_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(i64::try_from(depth).unwrap_or(i64::MAX));
}

pub fn set_unavailable_units(count: usize) {
    UNAVAILABLE_UNITS.set(i64::try_from(count).unwrap_or(i64::MAX));
}

/// Text exposition of the registry, as served on `/metrics`
pub fn gather_text() -> Result<String> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
