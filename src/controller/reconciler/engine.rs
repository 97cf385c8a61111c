//! # Engine Helpers
//!
//! Steps shared by every reconciled kind: admission, finalizer handling,
//! status writes, generation re-checks and requeue computation.

use super::decision::{decide, phase, Decision};
use super::status::mark_skipped;
use super::store::{ResourceStore, StoreError};
use super::types::{Reconciler, ReconcilerError, TriggerSource};
use super::validation::sync_period;
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::error::{ErrorClass, Stage, StageFailure};
use crate::controller::in_flight::{Admission, InFlightGuard};
use crate::crd::{ConditionType, Reconcilable, ReconcileStatus};
use crate::observability::metrics;
use chrono::Utc;
use kube::core::object::HasStatus;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Why an attempt stopped early
#[derive(Debug)]
pub(super) enum Abort {
    /// Stage failure, committed to status
    Failed(StageFailure),
    /// Infrastructure failure, returned to the runtime
    Store(ReconcilerError),
}

impl From<StageFailure> for Abort {
    fn from(failure: StageFailure) -> Self {
        Abort::Failed(failure)
    }
}

impl From<ReconcilerError> for Abort {
    fn from(error: ReconcilerError) -> Self {
        Abort::Store(error)
    }
}

/// What a reconcile call should do after admission, and on which copy of
/// the resource
pub(super) enum Admitted<K> {
    Attempt(TriggerSource, InFlightGuard, Arc<K>),
    Delete(InFlightGuard, Arc<K>),
    Done(Action),
}

/// `(namespace, name)` of a namespaced resource
pub(super) fn target<K: Reconcilable>(resource: &K) -> Result<(String, String), ReconcilerError> {
    let name = resource.name_any();
    let namespace = resource
        .namespace()
        .ok_or_else(|| ReconcilerError::MissingNamespace {
            kind: K::KIND_LABEL,
            name: name.clone(),
        })?;
    Ok((namespace, name))
}

fn in_flight_key<K: Reconcilable>(namespace: &str, name: &str) -> String {
    format!("{}/{namespace}/{name}", K::KIND_LABEL)
}

/// Whether `decision` was made on a snapshot showing work still in progress
///
/// The watch cache trails our own status writes: `Reconciling` or
/// `Deleting` left True can belong to an attempt that already committed as
/// easily as to one that crashed.
fn may_be_stale<K: Reconcilable>(resource: &K, decision: Decision) -> bool {
    let in_progress = |ty: ConditionType| {
        resource
            .status()
            .is_some_and(|s| s.generic().is_true(ty))
    };
    match decision {
        Decision::Reconcile(_) => in_progress(ConditionType::Reconciling),
        Decision::Delete => in_progress(ConditionType::Deleting),
        _ => false,
    }
}

/// Decide and take the per-key in-flight marker when work is due
pub(super) async fn admit<K: Reconcilable>(
    resource: &Arc<K>,
    ctx: &Reconciler,
    store: &dyn ResourceStore<K>,
    namespace: &str,
    name: &str,
) -> Result<Admitted<K>, ReconcilerError> {
    let now = Utc::now();
    let mut resource = Arc::clone(resource);
    let mut decision = decide(resource.as_ref(), now, &ctx.backoff);
    debug!(?decision, phase = %phase(resource.as_ref()), "decision");

    if may_be_stale(resource.as_ref(), decision) {
        let Some(fresh) = store.get(namespace, name).await? else {
            debug!("object gone on re-read");
            return Ok(Admitted::Done(Action::await_change()));
        };
        resource = Arc::new(fresh);
        decision = decide(resource.as_ref(), now, &ctx.backoff);
        debug!(?decision, phase = %phase(resource.as_ref()), "decision after re-read");
    }

    match decision {
        Decision::Paused => {
            return skip(store, resource.as_ref(), "Paused").await.map(Admitted::Done)
        }
        Decision::Canceled => {
            return skip(store, resource.as_ref(), "Canceled").await.map(Admitted::Done)
        }
        Decision::Wait(after) => return Ok(Admitted::Done(wait_action(K::KIND_LABEL, after))),
        Decision::Delete | Decision::Reconcile(_) => {}
    }

    let guard = match ctx.in_flight.try_begin(&in_flight_key::<K>(namespace, name)) {
        Admission::Acquired(guard) => guard,
        Admission::Coalesced => {
            metrics::increment_coalesced_triggers(K::KIND_LABEL);
            debug!("attempt already in flight, re-check recorded");
            return Ok(Admitted::Done(Action::await_change()));
        }
    };

    Ok(match decision {
        Decision::Reconcile(trigger) => Admitted::Attempt(trigger, guard, resource),
        _ => Admitted::Delete(guard, resource),
    })
}

/// Release the in-flight marker, turning a pending re-check into an
/// immediate requeue
pub(super) fn release<K: Reconcilable>(
    guard: InFlightGuard,
    result: Result<Action, ReconcilerError>,
) -> Result<Action, ReconcilerError> {
    let recheck = guard.finish();
    let action = result?;
    if recheck {
        debug!("trigger arrived during attempt, re-checking");
        metrics::increment_requeues(K::KIND_LABEL, "coalesced");
        return Ok(Action::requeue(Duration::ZERO));
    }
    Ok(action)
}

pub(super) fn wait_action(kind: &str, after: Option<Duration>) -> Action {
    match after {
        Some(delay) => {
            debug!(requeue_secs = delay.as_secs(), "nothing due yet");
            metrics::increment_requeues(kind, "scheduled");
            Action::requeue(delay)
        }
        None => Action::await_change(),
    }
}

/// Write `status`, counting rejected writes
pub(super) async fn write<K: Reconcilable>(
    store: &dyn ResourceStore<K>,
    resource: &K,
    status: &<K as HasStatus>::Status,
) -> Result<(), ReconcilerError> {
    store.write_status(resource, status).await.map_err(|e| {
        metrics::increment_status_write_errors(K::KIND_LABEL);
        warn!(error = %e, "status write failed");
        ReconcilerError::from(e)
    })
}

/// Status writes during deletion: the object may vanish between reads
/// once another finalizer lets go
pub(super) fn tolerate_gone(result: Result<(), ReconcilerError>) -> Result<(), ReconcilerError> {
    match result {
        Err(ReconcilerError::Store(StoreError::NotFound { .. })) => Ok(()),
        other => other,
    }
}

/// Paused / canceled: record the reason once, run nothing
async fn skip<K: Reconcilable>(
    store: &dyn ResourceStore<K>,
    resource: &K,
    reason: &str,
) -> Result<Action, ReconcilerError> {
    if let Some(status) = mark_skipped(resource.status(), reason, Utc::now()) {
        info!(reason, "reconciliation skipped");
        write(store, resource, &status).await?;
    }
    Ok(Action::await_change())
}

pub(super) fn has_finalizer<K: Reconcilable>(resource: &K) -> bool {
    resource.finalizers().iter().any(|f| f == K::FINALIZER)
}

/// Add the kind's finalizer before the first attempt touches the cluster
pub(super) async fn ensure_finalizer<K: Reconcilable>(
    store: &dyn ResourceStore<K>,
    resource: &K,
) -> Result<(), ReconcilerError> {
    if has_finalizer(resource) {
        return Ok(());
    }
    let mut finalizers = resource.finalizers().to_vec();
    finalizers.push(K::FINALIZER.to_string());
    store.set_finalizers(resource, finalizers).await?;
    debug!(finalizer = K::FINALIZER, "finalizer added");
    Ok(())
}

pub(super) async fn remove_finalizer<K: Reconcilable>(
    store: &dyn ResourceStore<K>,
    resource: &K,
) -> Result<(), ReconcilerError> {
    let finalizers: Vec<String> = resource
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != K::FINALIZER)
        .cloned()
        .collect();
    store.set_finalizers(resource, finalizers).await?;
    debug!(finalizer = K::FINALIZER, "finalizer removed");
    Ok(())
}

/// Conflict failure when the spec moved since the attempt started
pub(super) async fn check_generation<K: Reconcilable>(
    store: &dyn ResourceStore<K>,
    resource: &K,
    namespace: &str,
    name: &str,
    stage: Stage,
) -> Result<(), Abort> {
    let observed = resource.meta().generation;
    let current = store
        .generation(namespace, name)
        .await
        .map_err(ReconcilerError::from)?;
    if current == observed {
        return Ok(());
    }
    Err(StageFailure::conflict(stage, observed, current).into())
}

/// Requeue after a committed failure
pub(super) fn failure_action(
    kind: &str,
    failure: &StageFailure,
    consecutive_failures: u32,
    backoff: &ExponentialBackoff,
) -> Action {
    if failure.class.is_retryable() {
        let delay = backoff.delay(consecutive_failures);
        info!(
            requeue_secs = delay.as_secs(),
            consecutive_failures,
            "retrying with backoff"
        );
        metrics::increment_requeues(kind, "backoff");
        Action::requeue(delay)
    } else {
        info!(class = failure.class.as_str(), "not retryable, waiting for a spec change");
        Action::await_change()
    }
}

/// Requeue after a committed success
pub(super) fn success_action(kind: &str, period: Option<&str>) -> Action {
    match sync_period(period).ok().flatten() {
        Some(period) => {
            metrics::increment_requeues(kind, "sync-period");
            Action::requeue(period)
        }
        None => Action::await_change(),
    }
}

/// Requeue after the spec moved mid-attempt; nothing is committed
pub(super) fn conflict_action(kind: &str, failure: &StageFailure) -> Action {
    debug_assert_eq!(failure.class, ErrorClass::Conflict);
    info!(stage = %failure.stage, "{}, requeueing", failure.message);
    metrics::increment_requeues(kind, "conflict");
    Action::requeue(Duration::ZERO)
}
