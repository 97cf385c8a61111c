//! # Scheduling Decision
//!
//! Pure function from a resource snapshot and the current time to what the
//! engine does next. Everything it needs is on the resource: spec flags,
//! generation, conditions and the attempt bookkeeping in status.

use super::types::TriggerSource;
use super::validation::sync_period;
use crate::constants::RECONCILE_TRIGGER_ANNOTATION;
use crate::controller::backoff::ExponentialBackoff;
use crate::crd::{ConditionType, Reconcilable, ReconcileStatus};
use chrono::{DateTime, Utc};
use kube::Resource;
use std::time::Duration;

/// Derived lifecycle phase, for logs and the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppPhase {
    Idle,
    Reconciling,
    Succeeded,
    Failed,
    Paused,
    Deleting,
    Canceled,
}

impl AppPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AppPhase::Idle => "Idle",
            AppPhase::Reconciling => "Reconciling",
            AppPhase::Succeeded => "Succeeded",
            AppPhase::Failed => "Failed",
            AppPhase::Paused => "Paused",
            AppPhase::Deleting => "Deleting",
            AppPhase::Canceled => "Canceled",
        }
    }
}

impl std::fmt::Display for AppPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the engine does with a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Delete,
    Paused,
    Canceled,
    Reconcile(TriggerSource),
    /// Nothing due; requeue after the given delay, or wait for a change
    Wait(Option<Duration>),
}

/// Phase of `resource` from its spec flags and conditions
pub fn phase<K: Reconcilable>(resource: &K) -> AppPhase {
    if resource.meta().deletion_timestamp.is_some() {
        return AppPhase::Deleting;
    }
    if resource.paused() {
        return AppPhase::Paused;
    }
    if resource.canceled() {
        return AppPhase::Canceled;
    }
    let Some(status) = resource.status() else {
        return AppPhase::Idle;
    };
    let generic = status.generic();
    if generic.is_true(ConditionType::Deleting) {
        AppPhase::Deleting
    } else if generic.is_true(ConditionType::Reconciling) {
        AppPhase::Reconciling
    } else if generic.is_true(ConditionType::ReconcileSucceeded) {
        AppPhase::Succeeded
    } else if generic.is_true(ConditionType::ReconcileFailed) {
        AppPhase::Failed
    } else {
        AppPhase::Idle
    }
}

/// Current value of the reconcile trigger annotation
pub fn trigger_annotation<K: Resource>(resource: &K) -> Option<&str> {
    resource
        .meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(RECONCILE_TRIGGER_ANNOTATION))
        .map(String::as_str)
}

fn remaining(due: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    (due - now).to_std().ok().filter(|d| !d.is_zero())
}

fn due_after(last: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| last.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Time left before a failed delete may run again
fn delete_retry_wait<K: Reconcilable>(
    resource: &K,
    now: DateTime<Utc>,
    backoff: &ExponentialBackoff,
) -> Option<Duration> {
    let status = resource.status()?;
    if !status.generic().is_true(ConditionType::DeleteFailed) {
        return None;
    }
    let attempt = status.attempt();
    let last = attempt.last_attempted()?;
    remaining(
        due_after(last, backoff.delay(attempt.consecutive_reconcile_failures)),
        now,
    )
}

/// Decide what to do with `resource` at `now`
pub fn decide<K: Reconcilable>(
    resource: &K,
    now: DateTime<Utc>,
    backoff: &ExponentialBackoff,
) -> Decision {
    if resource.meta().deletion_timestamp.is_some() {
        return match delete_retry_wait(resource, now, backoff) {
            Some(left) => Decision::Wait(Some(left)),
            None => Decision::Delete,
        };
    }
    if resource.paused() {
        return Decision::Paused;
    }
    if resource.canceled() {
        return Decision::Canceled;
    }

    let Some(status) = resource.status() else {
        return Decision::Reconcile(TriggerSource::SpecChange);
    };
    let generic = status.generic();
    let attempt = status.attempt();

    if !generic.is_current_for(resource.meta().generation) {
        return Decision::Reconcile(TriggerSource::SpecChange);
    }
    if let Some(trigger) = trigger_annotation(resource) {
        if attempt.last_handled_trigger.as_deref() != Some(trigger) {
            return Decision::Reconcile(TriggerSource::Manual);
        }
    }
    if generic.is_true(ConditionType::Reconciling) {
        return Decision::Reconcile(TriggerSource::Interrupted);
    }
    let Some(last) = attempt.last_attempted() else {
        return Decision::Reconcile(TriggerSource::SpecChange);
    };

    if generic.is_true(ConditionType::ReconcileFailed) {
        if attempt.last_failure_retryable != Some(true) {
            return Decision::Wait(None);
        }
        let due = due_after(last, backoff.delay(attempt.consecutive_reconcile_failures));
        return match remaining(due, now) {
            None => Decision::Reconcile(TriggerSource::BackoffRetry),
            Some(left) => Decision::Wait(Some(left)),
        };
    }

    // An invalid period is reported by the attempt itself; nothing to schedule
    let Some(period) = sync_period(resource.sync_period()).ok().flatten() else {
        return Decision::Wait(None);
    };
    match remaining(due_after(last, period), now) {
        None => Decision::Reconcile(TriggerSource::SyncPeriod),
        Some(left) => Decision::Wait(Some(left)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{App, AppSpec, AppStatus, ConditionStatus};
    use chrono::TimeZone;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn backoff() -> ExponentialBackoff {
        ExponentialBackoff::new(Duration::from_secs(30), Duration::from_secs(600))
    }

    fn app(generation: i64, sync_period: Option<&str>) -> App {
        let mut app = App::new(
            "demo",
            AppSpec {
                sync_period: sync_period.map(str::to_string),
                ..AppSpec::default()
            },
        );
        app.metadata.namespace = Some("default".to_string());
        app.metadata.generation = Some(generation);
        app
    }

    fn succeeded(generation: i64, attempted: DateTime<Utc>) -> AppStatus {
        let mut status = AppStatus::default();
        status.generic.observed_generation = Some(generation);
        status.generic.set_reconcile_state(
            ConditionType::ReconcileSucceeded,
            "Succeeded",
            None,
            attempted,
        );
        status.attempt.record_success(attempted);
        status
    }

    fn failed(generation: i64, attempted: DateTime<Utc>, failures: u32, retryable: bool) -> AppStatus {
        let mut status = AppStatus::default();
        status.generic.observed_generation = Some(generation);
        status.generic.set_reconcile_state(
            ConditionType::ReconcileFailed,
            "FetchFailed",
            Some("boom"),
            attempted,
        );
        for _ in 0..failures {
            status.attempt.record_failure(attempted, retryable);
        }
        status
    }

    #[test]
    fn test_new_resource_reconciles() {
        let app = app(1, None);
        assert_eq!(
            decide(&app, at(0), &backoff()),
            Decision::Reconcile(TriggerSource::SpecChange)
        );
        assert_eq!(phase(&app), AppPhase::Idle);
    }

    #[test]
    fn test_deletion_wins_over_pause() {
        let mut app = app(1, None);
        app.spec.paused = true;
        app.metadata.deletion_timestamp = Some(Time(at(0)));
        assert_eq!(decide(&app, at(0), &backoff()), Decision::Delete);
        assert_eq!(phase(&app), AppPhase::Deleting);
    }

    #[test]
    fn test_failed_delete_waits_out_backoff() {
        let mut app = app(1, None);
        app.metadata.deletion_timestamp = Some(Time(at(0)));
        let mut status = AppStatus::default();
        status.generic.set_condition(
            ConditionType::DeleteFailed,
            ConditionStatus::True,
            "DeleteFailed",
            Some("cluster unreachable"),
            at(0),
        );
        status.attempt.record_failure(at(0), true);
        status.attempt.record_failure(at(0), true);
        app.status = Some(status);

        // two failures: 60s
        assert_eq!(
            decide(&app, at(1), &backoff()),
            Decision::Wait(Some(Duration::from_secs(59)))
        );
        assert_eq!(decide(&app, at(60), &backoff()), Decision::Delete);
        assert_eq!(phase(&app), AppPhase::Deleting);
    }

    #[test]
    fn test_paused_and_canceled_skip_regardless_of_generation() {
        let mut paused = app(7, None);
        paused.spec.paused = true;
        assert_eq!(decide(&paused, at(0), &backoff()), Decision::Paused);

        let mut canceled = app(7, None);
        canceled.spec.canceled = true;
        assert_eq!(decide(&canceled, at(0), &backoff()), Decision::Canceled);
        assert_eq!(phase(&canceled), AppPhase::Canceled);
    }

    #[test]
    fn test_generation_change_reconciles() {
        let mut app = app(3, Some("1h"));
        app.status = Some(succeeded(2, at(0)));
        assert_eq!(
            decide(&app, at(1), &backoff()),
            Decision::Reconcile(TriggerSource::SpecChange)
        );
    }

    #[test]
    fn test_sync_period_schedule() {
        let mut app = app(2, Some("5m"));
        app.status = Some(succeeded(2, at(0)));
        assert_eq!(
            decide(&app, at(60), &backoff()),
            Decision::Wait(Some(Duration::from_secs(240)))
        );
        assert_eq!(
            decide(&app, at(300), &backoff()),
            Decision::Reconcile(TriggerSource::SyncPeriod)
        );
        assert_eq!(phase(&app), AppPhase::Succeeded);
    }

    #[test]
    fn test_no_sync_period_awaits_change() {
        let mut app = app(2, None);
        app.status = Some(succeeded(2, at(0)));
        assert_eq!(decide(&app, at(86_400), &backoff()), Decision::Wait(None));
    }

    #[test]
    fn test_retryable_failure_backs_off() {
        let mut app = app(2, Some("1h"));
        app.status = Some(failed(2, at(0), 2, true));
        // two failures: 60s
        assert_eq!(
            decide(&app, at(10), &backoff()),
            Decision::Wait(Some(Duration::from_secs(50)))
        );
        assert_eq!(
            decide(&app, at(60), &backoff()),
            Decision::Reconcile(TriggerSource::BackoffRetry)
        );
        assert_eq!(phase(&app), AppPhase::Failed);
    }

    #[test]
    fn test_non_retryable_failure_waits_for_change() {
        let mut app = app(2, Some("1m"));
        app.status = Some(failed(2, at(0), 1, false));
        assert_eq!(decide(&app, at(3600), &backoff()), Decision::Wait(None));
    }

    #[test]
    fn test_manual_trigger_annotation() {
        let mut app = app(2, None);
        let mut status = succeeded(2, at(0));
        status.attempt.last_handled_trigger = Some("1".to_string());
        app.status = Some(status);
        app.metadata.annotations = Some(
            [(RECONCILE_TRIGGER_ANNOTATION.to_string(), "1".to_string())].into(),
        );
        assert_eq!(decide(&app, at(1), &backoff()), Decision::Wait(None));

        app.metadata.annotations = Some(
            [(RECONCILE_TRIGGER_ANNOTATION.to_string(), "2".to_string())].into(),
        );
        assert_eq!(
            decide(&app, at(1), &backoff()),
            Decision::Reconcile(TriggerSource::Manual)
        );
    }

    #[test]
    fn test_interrupted_attempt_is_resumed() {
        let mut app = app(2, None);
        let mut status = succeeded(2, at(0));
        status
            .generic
            .set_reconcile_state(ConditionType::Reconciling, "Reconciling", None, at(5));
        app.status = Some(status);
        assert_eq!(
            decide(&app, at(6), &backoff()),
            Decision::Reconcile(TriggerSource::Interrupted)
        );
        assert_eq!(phase(&app), AppPhase::Reconciling);
    }
}
