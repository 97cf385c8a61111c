//! # Error Policy
//!
//! Error handling for the controller watch loops.
//!
//! Stage failures never reach this module: the engine records them on the
//! resource and schedules its own retry. What arrives here are failures to
//! persist that outcome, which are retried on the same backoff schedule.

use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::{Reconcilable, ReconcileStatus};
use crate::observability::metrics;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Requeue a resource whose reconcile returned an error
pub fn handle_reconciliation_error<K: Reconcilable>(
    obj: Arc<K>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    let failures = obj
        .status()
        .map_or(0, |s| s.attempt().consecutive_reconcile_failures);
    let delay = ctx.backoff.delay(failures.saturating_add(1));

    error!(
        resource.kind = K::KIND_LABEL,
        resource.name = %name,
        resource.namespace = %namespace,
        error = %error,
        requeue_secs = delay.as_secs(),
        "reconciliation error"
    );
    metrics::increment_reconciliation_errors(K::KIND_LABEL, "engine", "transient");
    metrics::increment_requeues(K::KIND_LABEL, "error-backoff");
    Action::requeue(delay)
}

/// Kind of watch stream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    Unauthorized,
    Expired,
    Throttled,
    NotFound,
    Other,
}

/// Classify a watch stream error from its debug rendering
///
/// 404 is checked before 401: a plain-text 404 body surfaces as a serde error
/// mentioning `WatchFailed`.
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    if (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found {
        WatchErrorKind::Unauthorized
    } else if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        WatchErrorKind::Expired
    } else if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        WatchErrorKind::Throttled
    } else if is_not_found {
        WatchErrorKind::NotFound
    } else {
        WatchErrorKind::Other
    }
}

/// Handle a watch stream error
///
/// Returns `None` to filter the error out (the stream restarts) or `Some(())`
/// to keep going.
pub async fn handle_watch_stream_error(
    kind: &str,
    error_string: &str,
    backoff: &AtomicU64,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) -> Option<()> {
    match classify_watch_error(error_string) {
        WatchErrorKind::Unauthorized => {
            error!(
                resource.kind = kind,
                "watch authentication failed (401): RBAC may have been revoked or the token expired"
            );
            warn!(
                "waiting {}s before retrying watch",
                watch_restart_delay.as_secs()
            );
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
        WatchErrorKind::Expired => {
            warn!(resource.kind = kind, "watch resource version expired (410), restarting watch");
            None
        }
        WatchErrorKind::Throttled => {
            let current = backoff.load(Ordering::Relaxed);
            warn!(
                resource.kind = kind,
                "API server throttling watch (429), backing off {}ms",
                current
            );
            tokio::time::sleep(Duration::from_millis(current)).await;
            backoff.store(current.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
            None
        }
        WatchErrorKind::NotFound => {
            warn!(
                resource.kind = kind,
                "resource not found (404); the object was deleted or the CRD is missing: {}",
                error_string
            );
            Some(())
        }
        WatchErrorKind::Other => {
            error!(resource.kind = kind, "controller stream error: {}", error_string);
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
    }
}
