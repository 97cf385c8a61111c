//! # App Deletion
//!
//! Removes the App's deployed resources and releases the finalizer. A failed
//! delete keeps the finalizer and is retried on the backoff schedule.

use super::engine;
use super::status::{mark_delete_failed, mark_deleting};
use super::types::{Reconciler, ReconcilerError};
use crate::controller::deploy::DeployError;
use crate::controller::error::{Stage, StageFailure};
use crate::crd::{App, Reconcilable};
use crate::observability::metrics;
use chrono::Utc;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Delete an App marked for deletion
pub(super) async fn delete_app(app: &App, ctx: &Reconciler) -> Result<Action, ReconcilerError> {
    if !engine::has_finalizer(app) {
        return Ok(Action::await_change());
    }

    let started = Utc::now();
    let store = ctx.apps.as_ref();
    let mut status = mark_deleting(app.status.as_ref(), started);
    engine::tolerate_gone(engine::write(store, app, &status).await)?;

    if app.spec.noop_delete {
        info!("noopDelete set, leaving deployed resources in place");
    } else {
        // Progress is not recorded for deletes; the receiver only keeps the
        // channel open while kapp runs
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = ctx
            .deployer
            .delete(
                &app.kapp_app_name(),
                &app.namespace().unwrap_or_default(),
                &app.spec.deploy.kapp,
                &tx,
            )
            .await;

        if !result.is_success() {
            let error = DeployError::Failed {
                operation: "delete",
                result,
            };
            let failure = StageFailure::new(Stage::Delete, &error, Some(error.result().clone()));
            warn!("App {} delete failed: {}", app.name_any(), failure.message);
            // Delete output shares the deploy record
            status.deploy = Some(
                error
                    .result()
                    .to_stage_status(ctx.status_output_limit),
            );
            mark_delete_failed(&mut status, &failure, started, Utc::now());
            engine::tolerate_gone(engine::write(store, app, &status).await)?;
            metrics::increment_reconciliation_errors(
                App::KIND_LABEL,
                Stage::Delete.as_str(),
                failure.class.as_str(),
            );
            return Ok(engine::failure_action(
                App::KIND_LABEL,
                &failure,
                status.attempt.consecutive_reconcile_failures,
                &ctx.backoff,
            ));
        }
    }

    engine::remove_finalizer(store, app).await?;
    metrics::increment_deletions(App::KIND_LABEL);
    info!("App {} deleted", app.name_any());
    Ok(Action::await_change())
}
