//! # App Reconciliation
//!
//! One attempt runs Fetch, Template and Deploy (plus an optional Inspect)
//! against a fresh scratch directory, writing status at every stage
//! boundary. The spec generation is re-read after each stage; a change
//! abandons the attempt without committing an outcome.

use super::decision::trigger_annotation;
use super::engine::{self, Abort, Admitted};
use super::finalize;
use super::status::{mark_failed, mark_reconciling, mark_stage, mark_succeeded};
use super::types::{Reconciler, ReconcilerError, TriggerSource};
use super::validation::{validate_app, ValidationError};
use crate::controller::deploy::{DeployError, DeployEvent};
use crate::controller::error::{Classify, ErrorClass, Stage, StageFailure};
use crate::controller::fetch::FetchError;
use crate::controller::template::{parse_steps, TemplateContext};
use crate::crd::{App, AppStatus, Reconcilable};
use crate::exec::CmdRunResult;
use crate::observability::metrics;
use chrono::Utc;
use kube::Resource;
use kube_runtime::controller::Action;
use sha2::{Digest, Sha256};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Reconcile one App
///
/// # Errors
///
/// Returns an error only when status could not be written; stage failures
/// are recorded on the App and requeued from here.
pub async fn reconcile_app(app: Arc<App>, ctx: Arc<Reconciler>) -> Result<Action, ReconcilerError> {
    let (namespace, name) = engine::target(app.as_ref())?;
    let span = info_span!(
        "reconcile",
        resource.kind = App::KIND_LABEL,
        resource.name = %name,
        resource.namespace = %namespace
    );

    async move {
        let store = ctx.apps.as_ref();
        match engine::admit(&app, &ctx, store, &namespace, &name).await? {
            Admitted::Done(action) => Ok(action),
            Admitted::Delete(guard, app) => {
                let result = finalize::delete_app(&app, &ctx).await;
                engine::release::<App>(guard, result)
            }
            Admitted::Attempt(trigger, guard, app) => {
                let result = run_attempt(&app, &ctx, &namespace, &name, trigger).await;
                engine::release::<App>(guard, result)
            }
        }
    }
    .instrument(span)
    .await
}

async fn run_attempt(
    app: &App,
    ctx: &Reconciler,
    namespace: &str,
    name: &str,
    trigger: TriggerSource,
) -> Result<Action, ReconcilerError> {
    let started = Utc::now();
    let timer = Instant::now();
    let store = ctx.apps.as_ref();
    info!("Reconciling App {namespace}/{name} (trigger source: {trigger})");
    metrics::increment_reconciliations(App::KIND_LABEL, trigger.as_str());

    engine::ensure_finalizer(store, app).await?;

    let previous = app.status.clone().unwrap_or_default();
    let mut status = mark_reconciling(&previous, trigger_annotation(app), started);
    status.fetch = None;
    status.template = None;
    status.deploy = None;
    status.inspect = None;
    engine::write(store, app, &status).await?;

    let cancel = ctx.shutdown.child_token();
    let mut attempt = AppAttempt {
        app,
        ctx,
        namespace,
        name,
        cancel: &cancel,
        status,
        progress: ProgressThrottle::default(),
    };
    let outcome = attempt.run().await;
    let mut status = attempt.status;
    let generation = app.meta().generation;

    match outcome {
        Ok(manifest) => {
            status.deployed_digest = Some(manifest_digest(&manifest));
            mark_succeeded(&mut status, generation, started, Utc::now());
            engine::write(store, app, &status).await?;
            metrics::observe_reconciliation_duration(
                App::KIND_LABEL,
                timer.elapsed().as_secs_f64(),
            );
            info!(
                duration_ms = timer.elapsed().as_millis(),
                "App {namespace}/{name} reconciled"
            );
            Ok(engine::success_action(
                App::KIND_LABEL,
                app.spec.sync_period.as_deref(),
            ))
        }
        Err(Abort::Failed(failure)) if failure.class == ErrorClass::Conflict => {
            cancel.cancel();
            Ok(engine::conflict_action(App::KIND_LABEL, &failure))
        }
        Err(Abort::Failed(_)) if ctx.shutdown.is_cancelled() => {
            // Reconciling stays True; the next process resumes the attempt
            info!("shutdown during attempt, leaving App {namespace}/{name} for the next run");
            Ok(Action::await_change())
        }
        Err(Abort::Failed(failure)) => {
            warn!(
                stage = %failure.stage,
                class = failure.class.as_str(),
                "App {namespace}/{name} failed: {}",
                failure.message
            );
            mark_failed(&mut status, generation, &failure, started, Utc::now());
            engine::write(store, app, &status).await?;
            metrics::increment_reconciliation_errors(
                App::KIND_LABEL,
                failure.stage.as_str(),
                failure.class.as_str(),
            );
            metrics::observe_reconciliation_duration(
                App::KIND_LABEL,
                timer.elapsed().as_secs_f64(),
            );
            Ok(engine::failure_action(
                App::KIND_LABEL,
                &failure,
                status.attempt.consecutive_reconcile_failures,
                &ctx.backoff,
            ))
        }
        Err(Abort::Store(e)) => Err(e),
    }
}

/// `sha256:<hex>` of a rendered manifest
fn manifest_digest(manifest: &str) -> String {
    format!("sha256:{:x}", Sha256::digest(manifest.as_bytes()))
}

/// Last non-empty stdout line of a progress snapshot
fn last_line(result: &CmdRunResult) -> Option<&str> {
    result
        .stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
}

/// Limits how often deploy progress reaches the API server
#[derive(Debug, Default)]
struct ProgressThrottle {
    last_write: Option<Instant>,
    last_line: Option<String>,
}

impl ProgressThrottle {
    /// Whether `line` should be written now
    fn admit(&mut self, line: &str, interval: std::time::Duration) -> bool {
        if self.last_line.as_deref() == Some(line) {
            return false;
        }
        if self.last_write.is_some_and(|at| at.elapsed() < interval) {
            return false;
        }
        self.last_write = Some(Instant::now());
        self.last_line = Some(line.to_string());
        true
    }
}

/// State of one running attempt
struct AppAttempt<'a> {
    app: &'a App,
    ctx: &'a Reconciler,
    namespace: &'a str,
    name: &'a str,
    cancel: &'a CancellationToken,
    status: AppStatus,
    progress: ProgressThrottle,
}

impl AppAttempt<'_> {
    /// Run every stage, returning the applied manifest
    async fn run(&mut self) -> Result<String, Abort> {
        let app = self.app;
        let ctx = self.ctx;
        let namespace = self.namespace;
        let name = self.name;
        let cancel = self.cancel;
        let spec = &app.spec;

        validate_app(spec).map_err(|e| self.fail(Stage::Validate, &e, None))?;
        let steps = parse_steps(&spec.template)
            .map_err(|e| self.fail(Stage::Validate, &ValidationError::from(e), None))?;

        let scratch = std::fs::create_dir_all(&ctx.scratch_root)
            .and_then(|()| {
                tempfile::Builder::new()
                    .prefix(&format!("{namespace}-{name}-"))
                    .tempdir_in(&ctx.scratch_root)
            })
            .map_err(|e| {
                let error = FetchError::io("failed to create scratch directory", e);
                self.fail(Stage::Fetch, &error, None)
            })?;
        debug!(scratch = %scratch.path().display(), "attempt scratch directory");

        // Fetch
        self.enter(Stage::Fetch).await?;
        let timer = Instant::now();
        let fetched = ctx
            .resolver
            .resolve_all(&spec.fetch, scratch.path(), namespace, cancel)
            .await;
        metrics::observe_stage_duration(Stage::Fetch.as_str(), timer.elapsed().as_secs_f64());
        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => return Err(self.fail(Stage::Fetch, &e, e.result())),
        };
        self.record(Stage::Fetch, &fetched.result);
        self.check_generation(Stage::Fetch).await?;

        // Template
        self.enter(Stage::Template).await?;
        let timer = Instant::now();
        let template_ctx = TemplateContext {
            app_name: name.to_string(),
            namespace: namespace.to_string(),
        };
        let rendered = ctx
            .pipeline
            .render(
                &fetched.root,
                &scratch.path().join("template"),
                &steps,
                &template_ctx,
                cancel,
            )
            .await;
        metrics::observe_stage_duration(Stage::Template.as_str(), timer.elapsed().as_secs_f64());
        let rendered = match rendered {
            Ok(rendered) => rendered,
            Err(e) => return Err(self.fail(Stage::Template, &e, e.result())),
        };
        self.record(Stage::Template, &rendered.combined_result());
        self.check_generation(Stage::Template).await?;

        // Deploy runs to completion once started
        let timer = Instant::now();
        let deployer = Arc::clone(&ctx.deployer);
        let kapp_app = app.kapp_app_name();
        let opts = &spec.deploy.kapp;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = {
            let deploy = deployer.deploy(&rendered.manifest, &kapp_app, namespace, opts, &tx);
            tokio::pin!(deploy);
            loop {
                tokio::select! {
                    biased;
                    Some(event) = rx.recv() => self.on_deploy_event(event).await,
                    result = &mut deploy => break result,
                }
            }
        };
        while let Ok(event) = rx.try_recv() {
            self.on_deploy_event(event).await;
        }
        metrics::observe_stage_duration(Stage::Deploy.as_str(), timer.elapsed().as_secs_f64());
        if !result.is_success() {
            let error = DeployError::Failed {
                operation: "deploy",
                result,
            };
            return Err(self.fail(Stage::Deploy, &error, Some(error.result())));
        }
        self.record(Stage::Deploy, &result);
        info!(app = %kapp_app, bytes = rendered.manifest.len(), "deploy finished");

        if opts.inspect.is_some() {
            self.enter(Stage::Inspect).await?;
            let result = deployer.inspect(&kapp_app, namespace, opts).await;
            if !result.is_success() {
                warn!("kapp inspect failed: {}", result.error_summary());
            }
            self.record(Stage::Inspect, &result);
        }

        self.check_generation(Stage::Deploy).await?;
        Ok(rendered.manifest)
    }

    /// Mark `stage` as running and write status
    async fn enter(&mut self, stage: Stage) -> Result<(), ReconcilerError> {
        mark_stage(&mut self.status, stage.title(), Utc::now());
        engine::write(self.ctx.apps.as_ref(), self.app, &self.status).await
    }

    async fn check_generation(&self, stage: Stage) -> Result<(), Abort> {
        engine::check_generation(
            self.ctx.apps.as_ref(),
            self.app,
            self.namespace,
            self.name,
            stage,
        )
        .await
    }

    fn record(&mut self, stage: Stage, result: &CmdRunResult) {
        let record = Some(result.to_stage_status(self.ctx.status_output_limit));
        match stage {
            Stage::Fetch => self.status.fetch = record,
            Stage::Template => self.status.template = record,
            Stage::Deploy => self.status.deploy = record,
            Stage::Inspect => self.status.inspect = record,
            _ => {}
        }
    }

    /// Record a stage failure on the in-memory status
    fn fail<E>(&mut self, stage: Stage, error: &E, result: Option<&CmdRunResult>) -> Abort
    where
        E: Classify + Display,
    {
        let result = result
            .cloned()
            .unwrap_or_else(|| CmdRunResult::failure(error.to_string()));
        self.record(stage, &result);
        StageFailure::new(stage, error, Some(result)).into()
    }

    /// Progress writes are best-effort: a rejected write never interrupts a
    /// running deploy
    async fn on_deploy_event(&mut self, event: DeployEvent) {
        let store = self.ctx.apps.as_ref();
        match event {
            DeployEvent::Started => {
                mark_stage(&mut self.status, Stage::Deploy.title(), Utc::now());
                if let Err(e) = engine::write(store, self.app, &self.status).await {
                    debug!(error = %e, "deploy start not recorded");
                }
            }
            DeployEvent::Progress(snapshot) => {
                self.record(Stage::Deploy, &snapshot);
                let Some(line) = last_line(&snapshot) else {
                    return;
                };
                if !self
                    .progress
                    .admit(line, self.ctx.progress_write_interval)
                {
                    return;
                }
                self.status.generic.friendly_description = Some(format!("Deploying: {line}"));
                if let Err(e) = engine::write(store, self.app, &self.status).await {
                    debug!(error = %e, "deploy progress not recorded");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_manifest_digest_is_prefixed_hex() {
        let digest = manifest_digest("kind: ConfigMap\n");
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest.len(), "sha256:".len() + 64);
        assert_eq!(digest, manifest_digest("kind: ConfigMap\n"));
        assert_ne!(digest, manifest_digest("kind: Secret\n"));
    }

    #[test]
    fn test_last_line_skips_blank_tail() {
        let result = CmdRunResult::success("Target cluster ok\n3:04:05PM: create configmap/demo\n\n");
        assert_eq!(last_line(&result), Some("3:04:05PM: create configmap/demo"));
        assert_eq!(last_line(&CmdRunResult::success("")), None);
    }

    #[test]
    fn test_progress_throttle_drops_duplicates_and_bursts() {
        let mut throttle = ProgressThrottle::default();
        assert!(throttle.admit("a", Duration::ZERO));
        assert!(!throttle.admit("a", Duration::ZERO));
        assert!(throttle.admit("b", Duration::ZERO));

        let mut throttle = ProgressThrottle::default();
        assert!(throttle.admit("a", Duration::from_secs(60)));
        assert!(!throttle.admit("b", Duration::from_secs(60)));
    }
}
