//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `app_controller_reconciliations_total` - Attempts started, by kind and trigger
//! - `app_controller_reconciliation_errors_total` - Failed attempts, by kind, stage and class
//! - `app_controller_reconciliation_duration_seconds` - Duration of attempts, by kind
//! - `app_controller_stage_duration_seconds` - Duration of each stage
//! - `app_controller_requeues_total` - Requeues scheduled, by kind and reason
//! - `app_controller_coalesced_triggers_total` - Triggers folded into a running attempt
//! - `app_controller_deletions_total` - Finalizers released, by kind
//! - `app_controller_packages_registered` - Documents registered per repository
//! - `app_controller_status_write_errors_total` - Status writes rejected by the API server

use anyhow::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "app_controller_reconciliations_total",
            "Total number of reconciliation attempts",
        ),
        &["kind", "trigger"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "app_controller_reconciliation_errors_total",
            "Total number of failed reconciliation attempts",
        ),
        &["kind", "stage", "class"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "app_controller_reconciliation_duration_seconds",
            "Duration of reconciliation attempts in seconds",
        )
        .buckets(vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static STAGE_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "app_controller_stage_duration_seconds",
            "Duration of reconciliation stages in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0]),
        &["stage"],
    )
    .expect("Failed to create STAGE_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "app_controller_requeues_total",
            "Total number of requeues scheduled by the engine",
        ),
        &["kind", "reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static COALESCED_TRIGGERS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "app_controller_coalesced_triggers_total",
            "Total number of triggers coalesced into an in-flight attempt",
        ),
        &["kind"],
    )
    .expect("Failed to create COALESCED_TRIGGERS_TOTAL metric - this should never happen")
});

static DELETIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "app_controller_deletions_total",
            "Total number of completed deletions",
        ),
        &["kind"],
    )
    .expect("Failed to create DELETIONS_TOTAL metric - this should never happen")
});

static PACKAGES_REGISTERED: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "app_controller_packages_registered",
            "Package and PackageMetadata documents registered per repository",
        ),
        &["namespace", "repository"],
    )
    .expect("Failed to create PACKAGES_REGISTERED metric - this should never happen")
});

static STATUS_WRITE_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "app_controller_status_write_errors_total",
            "Total number of status writes rejected by the API server",
        ),
        &["kind"],
    )
    .expect("Failed to create STATUS_WRITE_ERRORS_TOTAL metric - this should never happen")
});

/// Register all metrics with the registry
///
/// # Errors
///
/// Returns an error if a metric is already registered
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(STAGE_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COALESCED_TRIGGERS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DELETIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PACKAGES_REGISTERED.clone()))?;
    REGISTRY.register(Box::new(STATUS_WRITE_ERRORS_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(kind: &str, trigger: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind, trigger]).inc();
}

pub fn increment_reconciliation_errors(kind: &str, stage: &str, class: &str) {
    RECONCILIATION_ERRORS_TOTAL
        .with_label_values(&[kind, stage, class])
        .inc();
}

pub fn observe_reconciliation_duration(kind: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[kind])
        .observe(duration);
}

pub fn observe_stage_duration(stage: &str, duration: f64) {
    STAGE_DURATION.with_label_values(&[stage]).observe(duration);
}

pub fn increment_requeues(kind: &str, reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[kind, reason]).inc();
}

pub fn increment_coalesced_triggers(kind: &str) {
    COALESCED_TRIGGERS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_deletions(kind: &str) {
    DELETIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn set_packages_registered(namespace: &str, repository: &str, count: usize) {
    PACKAGES_REGISTERED
        .with_label_values(&[namespace, repository])
        .set(i64::try_from(count).unwrap_or(i64::MAX));
}

pub fn remove_packages_registered(namespace: &str, repository: &str) {
    // Absent series is fine: the repository may never have registered
    let _ = PACKAGES_REGISTERED.remove_label_values(&[namespace, repository]);
}

pub fn increment_status_write_errors(kind: &str) {
    STATUS_WRITE_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labeled_counters_accumulate() {
        let before = RECONCILIATIONS_TOTAL
            .with_label_values(&["App", "manual"])
            .get();
        increment_reconciliations("App", "manual");
        increment_reconciliations("App", "manual");
        assert_eq!(
            RECONCILIATIONS_TOTAL
                .with_label_values(&["App", "manual"])
                .get(),
            before + 2
        );
    }

    #[test]
    fn test_packages_gauge_is_set_and_removed() {
        set_packages_registered("pkgs", "metrics-test", 4);
        assert_eq!(
            PACKAGES_REGISTERED
                .with_label_values(&["pkgs", "metrics-test"])
                .get(),
            4
        );
        remove_packages_registered("pkgs", "metrics-test");
        remove_packages_registered("pkgs", "metrics-test");
    }
}
