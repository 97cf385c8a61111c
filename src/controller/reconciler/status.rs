//! # Status Transitions
//!
//! Each function takes the last written status and returns the next one.
//! Reconcile trio changes always go through
//! [`GenericStatus::set_reconcile_state`](crate::crd::GenericStatus::set_reconcile_state),
//! so no written status ever has two of them True.

use crate::controller::error::StageFailure;
use crate::crd::{ConditionStatus, ConditionType, ReconcileStatus};
use chrono::{DateTime, Utc};

/// Attempt started; the previous `observedGeneration` is kept
pub fn mark_reconciling<S: ReconcileStatus>(
    previous: &S,
    trigger: Option<&str>,
    now: DateTime<Utc>,
) -> S {
    let mut status = previous.clone();
    let generic = status.generic_mut();
    generic.set_reconcile_state(ConditionType::Reconciling, "Reconciling", None, now);
    generic.remove_condition(ConditionType::DeleteFailed);
    generic.friendly_description = Some("Reconciling".to_string());
    status.attempt_mut().last_handled_trigger = trigger.map(str::to_string);
    status
}

/// Attempt moved on to a new stage; `Reconciling` keeps its transition time
pub fn mark_stage<S: ReconcileStatus>(status: &mut S, title: &str, now: DateTime<Utc>) {
    let generic = status.generic_mut();
    generic.set_reconcile_state(ConditionType::Reconciling, title, None, now);
    generic.friendly_description = Some(title.to_string());
}

/// Attempt committed successfully
pub fn mark_succeeded<S: ReconcileStatus>(
    status: &mut S,
    generation: Option<i64>,
    started: DateTime<Utc>,
    now: DateTime<Utc>,
) {
    let generic = status.generic_mut();
    generic.observed_generation = generation;
    generic.set_reconcile_state(ConditionType::ReconcileSucceeded, "Succeeded", None, now);
    generic.friendly_description = Some("Reconcile succeeded".to_string());
    generic.useful_error_message = None;
    status.attempt_mut().record_success(started);
}

/// Attempt committed as failed
pub fn mark_failed<S: ReconcileStatus>(
    status: &mut S,
    generation: Option<i64>,
    failure: &StageFailure,
    started: DateTime<Utc>,
    now: DateTime<Utc>,
) {
    let generic = status.generic_mut();
    generic.observed_generation = generation;
    generic.set_reconcile_state(
        ConditionType::ReconcileFailed,
        failure.stage.failure_reason(),
        Some(&failure.message),
        now,
    );
    generic.friendly_description = Some(failure.friendly_description());
    generic.useful_error_message = Some(failure.message.clone());
    status
        .attempt_mut()
        .record_failure(started, failure.class.is_retryable());
}

/// Paused or canceled; returns `None` when the status already says so
pub fn mark_skipped<S: ReconcileStatus>(
    previous: Option<&S>,
    reason: &str,
    now: DateTime<Utc>,
) -> Option<S> {
    let mut status = previous.cloned().unwrap_or_default();
    let generic = status.generic_mut();
    let current = generic.condition(ConditionType::Reconciling);
    if current.is_some_and(|c| {
        c.status == ConditionStatus::False && c.reason.as_deref() == Some(reason)
    }) && generic.friendly_description.as_deref() == Some(reason)
    {
        return None;
    }
    generic.set_condition(
        ConditionType::Reconciling,
        ConditionStatus::False,
        reason,
        None,
        now,
    );
    generic.friendly_description = Some(reason.to_string());
    Some(status)
}

/// Deletion started
pub fn mark_deleting<S: ReconcileStatus>(previous: Option<&S>, now: DateTime<Utc>) -> S {
    let mut status = previous.cloned().unwrap_or_default();
    let generic = status.generic_mut();
    generic.set_condition(
        ConditionType::Reconciling,
        ConditionStatus::False,
        "Deleting",
        None,
        now,
    );
    generic.set_condition(
        ConditionType::Deleting,
        ConditionStatus::True,
        "Deleting",
        None,
        now,
    );
    generic.remove_condition(ConditionType::DeleteFailed);
    generic.friendly_description = Some("Deleting".to_string());
    status
}

/// Deletion failed; the finalizer stays and the delete is retried
pub fn mark_delete_failed<S: ReconcileStatus>(
    status: &mut S,
    failure: &StageFailure,
    started: DateTime<Utc>,
    now: DateTime<Utc>,
) {
    let generic = status.generic_mut();
    generic.set_condition(
        ConditionType::Deleting,
        ConditionStatus::False,
        failure.stage.failure_reason(),
        None,
        now,
    );
    generic.set_condition(
        ConditionType::DeleteFailed,
        ConditionStatus::True,
        failure.stage.failure_reason(),
        Some(&failure.message),
        now,
    );
    generic.friendly_description = Some(failure.friendly_description());
    generic.useful_error_message = Some(failure.message.clone());
    status.attempt_mut().record_failure(started, true);
}
