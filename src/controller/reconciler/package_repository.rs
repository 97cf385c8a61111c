//! # PackageRepository Reconciliation
//!
//! Fetch the repository bundle, unpack its `Package` / `PackageMetadata`
//! documents and register them, pruning documents the new revision no
//! longer ships. Deletion prunes everything the repository registered.

use super::decision::trigger_annotation;
use super::engine::{self, Abort, Admitted};
use super::registry::{PackageDocuments, RegisterError};
use super::status::{
    mark_delete_failed, mark_deleting, mark_failed, mark_reconciling, mark_stage, mark_succeeded,
};
use super::types::{Reconciler, ReconcilerError, TriggerSource};
use crate::controller::error::{Classify, ErrorClass, Stage, StageFailure};
use crate::controller::fetch::FetchError;
use crate::crd::{
    Package, PackageMetadata, PackageRepository, PackageRepositoryStatus, Reconcilable,
};
use crate::exec::CmdRunResult;
use crate::observability::metrics;
use chrono::Utc;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// apiVersion of the documents a repository may ship
pub const PACKAGE_DOCUMENT_API_VERSION: &str = "data.packaging.octopilot.io/v1alpha1";

#[derive(Debug, thiserror::Error)]
pub enum UnpackError {
    #[error("{path}: invalid YAML: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{path}: unsupported document {api_version} {kind}")]
    Unsupported {
        path: String,
        api_version: String,
        kind: String,
    },
    #[error("{path}: {kind} '{name}': {reason}")]
    Invalid {
        path: String,
        kind: &'static str,
        name: String,
        reason: String,
    },
    #[error("{kind} '{name}' is defined more than once")]
    Duplicate { kind: &'static str, name: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl Classify for UnpackError {
    fn class(&self) -> ErrorClass {
        match self {
            UnpackError::Io { .. } => ErrorClass::Transient,
            _ => ErrorClass::Config,
        }
    }
}

/// Just enough of a document to dispatch on
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeMeta {
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    kind: String,
}

/// Read every YAML file under `root` into package documents
///
/// Files are visited in path order. Documents that are empty or `null` are
/// skipped; anything that is not a Package or PackageMetadata is rejected.
pub fn unpack(root: &Path) -> Result<PackageDocuments, UnpackError> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e, "yaml" | "yml"))
        })
        .collect();
    files.sort();

    let mut documents = PackageDocuments::default();
    let mut package_names = BTreeSet::new();
    let mut metadata_names = BTreeSet::new();

    for file in files {
        let path = file
            .strip_prefix(root)
            .unwrap_or(&file)
            .display()
            .to_string();
        let content = std::fs::read_to_string(&file).map_err(|source| UnpackError::Io {
            path: path.clone(),
            source,
        })?;

        for document in serde_yaml::Deserializer::from_str(&content) {
            let value = serde_yaml::Value::deserialize(document).map_err(|source| {
                UnpackError::Yaml {
                    path: path.clone(),
                    source,
                }
            })?;
            if value.is_null() {
                continue;
            }
            let type_meta: TypeMeta =
                serde_yaml::from_value(value.clone()).map_err(|source| UnpackError::Yaml {
                    path: path.clone(),
                    source,
                })?;

            match (type_meta.api_version.as_str(), type_meta.kind.as_str()) {
                (PACKAGE_DOCUMENT_API_VERSION, "Package") => {
                    let package: Package =
                        serde_yaml::from_value(value).map_err(|source| UnpackError::Yaml {
                            path: path.clone(),
                            source,
                        })?;
                    validate_package(&package, &path)?;
                    if !package_names.insert(package.name_any()) {
                        return Err(UnpackError::Duplicate {
                            kind: "Package",
                            name: package.name_any(),
                        });
                    }
                    documents.packages.push(package);
                }
                (PACKAGE_DOCUMENT_API_VERSION, "PackageMetadata") => {
                    let metadata: PackageMetadata =
                        serde_yaml::from_value(value).map_err(|source| UnpackError::Yaml {
                            path: path.clone(),
                            source,
                        })?;
                    let name = metadata.name_any();
                    if name.is_empty() {
                        return Err(UnpackError::Invalid {
                            path,
                            kind: "PackageMetadata",
                            name,
                            reason: "metadata.name is required".to_string(),
                        });
                    }
                    if !metadata_names.insert(name.clone()) {
                        return Err(UnpackError::Duplicate {
                            kind: "PackageMetadata",
                            name,
                        });
                    }
                    documents.metadata.push(metadata);
                }
                _ => {
                    return Err(UnpackError::Unsupported {
                        path,
                        api_version: type_meta.api_version,
                        kind: type_meta.kind,
                    });
                }
            }
        }
    }

    Ok(documents)
}

fn validate_package(package: &Package, path: &str) -> Result<(), UnpackError> {
    let name = package.name_any();
    let invalid = |reason: String| UnpackError::Invalid {
        path: path.to_string(),
        kind: "Package",
        name: name.clone(),
        reason,
    };
    if package.spec.ref_name.is_empty() {
        return Err(invalid("spec.refName is required".to_string()));
    }
    if package.spec.version.is_empty() {
        return Err(invalid("spec.version is required".to_string()));
    }
    let expected = format!("{}.{}", package.spec.ref_name, package.spec.version);
    if name != expected {
        return Err(invalid(format!("name must be '{expected}'")));
    }
    Ok(())
}

/// Reconcile one PackageRepository
///
/// # Errors
///
/// Returns an error only when status could not be written.
pub async fn reconcile_package_repository(
    repository: Arc<PackageRepository>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let (namespace, name) = engine::target(repository.as_ref())?;
    let span = info_span!(
        "reconcile",
        resource.kind = PackageRepository::KIND_LABEL,
        resource.name = %name,
        resource.namespace = %namespace
    );

    async move {
        let store = ctx.repositories.as_ref();
        match engine::admit(&repository, &ctx, store, &namespace, &name).await? {
            Admitted::Done(action) => Ok(action),
            Admitted::Delete(guard, repository) => {
                let result = delete_repository(&repository, &ctx, &namespace, &name).await;
                engine::release::<PackageRepository>(guard, result)
            }
            Admitted::Attempt(trigger, guard, repository) => {
                let result = run_attempt(&repository, &ctx, &namespace, &name, trigger).await;
                engine::release::<PackageRepository>(guard, result)
            }
        }
    }
    .instrument(span)
    .await
}

async fn run_attempt(
    repository: &PackageRepository,
    ctx: &Reconciler,
    namespace: &str,
    name: &str,
    trigger: TriggerSource,
) -> Result<Action, ReconcilerError> {
    const KIND: &str = PackageRepository::KIND_LABEL;
    let started = Utc::now();
    let timer = Instant::now();
    let store = ctx.repositories.as_ref();
    info!("Reconciling PackageRepository {namespace}/{name} (trigger source: {trigger})");
    metrics::increment_reconciliations(KIND, trigger.as_str());

    engine::ensure_finalizer(store, repository).await?;

    let previous = repository.status.clone().unwrap_or_default();
    let mut status = mark_reconciling(&previous, trigger_annotation(repository), started);
    status.fetch = None;
    engine::write(store, repository, &status).await?;

    let cancel = ctx.shutdown.child_token();
    let outcome = RepositoryAttempt {
        repository,
        ctx,
        namespace,
        name,
        status: &mut status,
    }
    .run(&cancel)
    .await;
    let generation = repository.meta().generation;

    match outcome {
        Ok(documents) => {
            status.packages_registered = u32::try_from(documents.len()).unwrap_or(u32::MAX);
            mark_succeeded(&mut status, generation, started, Utc::now());
            engine::write(store, repository, &status).await?;
            metrics::set_packages_registered(namespace, name, documents.len());
            metrics::observe_reconciliation_duration(KIND, timer.elapsed().as_secs_f64());
            info!(
                packages = documents.packages.len(),
                metadata = documents.metadata.len(),
                "PackageRepository {namespace}/{name} reconciled"
            );
            Ok(engine::success_action(KIND, repository.spec.sync_period.as_deref()))
        }
        Err(Abort::Failed(failure)) if failure.class == ErrorClass::Conflict => {
            cancel.cancel();
            Ok(engine::conflict_action(KIND, &failure))
        }
        Err(Abort::Failed(_)) if ctx.shutdown.is_cancelled() => {
            info!("shutdown during attempt, leaving PackageRepository {namespace}/{name} for the next run");
            Ok(Action::await_change())
        }
        Err(Abort::Failed(failure)) => {
            warn!(
                stage = %failure.stage,
                class = failure.class.as_str(),
                "PackageRepository {namespace}/{name} failed: {}",
                failure.message
            );
            mark_failed(&mut status, generation, &failure, started, Utc::now());
            engine::write(store, repository, &status).await?;
            metrics::increment_reconciliation_errors(
                KIND,
                failure.stage.as_str(),
                failure.class.as_str(),
            );
            metrics::observe_reconciliation_duration(KIND, timer.elapsed().as_secs_f64());
            Ok(engine::failure_action(
                KIND,
                &failure,
                status.attempt.consecutive_reconcile_failures,
                &ctx.backoff,
            ))
        }
        Err(Abort::Store(e)) => Err(e),
    }
}

struct RepositoryAttempt<'a> {
    repository: &'a PackageRepository,
    ctx: &'a Reconciler,
    namespace: &'a str,
    name: &'a str,
    status: &'a mut PackageRepositoryStatus,
}

impl RepositoryAttempt<'_> {
    async fn run(mut self, cancel: &CancellationToken) -> Result<PackageDocuments, Abort> {
        let ctx = self.ctx;
        let namespace = self.namespace;
        let name = self.name;

        let scratch = std::fs::create_dir_all(&ctx.scratch_root)
            .and_then(|()| {
                tempfile::Builder::new()
                    .prefix(&format!("pkgr-{namespace}-{name}-"))
                    .tempdir_in(&ctx.scratch_root)
            })
            .map_err(|e| {
                let error = FetchError::io("failed to create scratch directory", e);
                self.fail(Stage::Fetch, &error, None)
            })?;

        self.enter(Stage::Fetch).await?;
        let timer = Instant::now();
        let fetched = ctx
            .resolver
            .resolve_all(
                std::slice::from_ref(&self.repository.spec.fetch),
                scratch.path(),
                namespace,
                cancel,
            )
            .await;
        metrics::observe_stage_duration(Stage::Fetch.as_str(), timer.elapsed().as_secs_f64());
        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => return Err(self.fail(Stage::Fetch, &e, e.result())),
        };
        self.status.fetch = Some(fetched.result.to_stage_status(ctx.status_output_limit));
        self.check_generation(Stage::Fetch).await?;

        self.enter(Stage::Unpack).await?;
        let documents = unpack(&fetched.root).map_err(|e| self.fail(Stage::Unpack, &e, None))?;
        debug!(documents = documents.len(), "repository unpacked");

        self.enter(Stage::Register).await?;
        let timer = Instant::now();
        let registered = register(ctx, namespace, name, &documents).await;
        metrics::observe_stage_duration(Stage::Register.as_str(), timer.elapsed().as_secs_f64());
        if let Err(e) = registered {
            return Err(self.fail(Stage::Register, &e, None));
        }

        self.check_generation(Stage::Register).await?;
        Ok(documents)
    }

    async fn enter(&mut self, stage: Stage) -> Result<(), ReconcilerError> {
        mark_stage(&mut *self.status, stage.title(), Utc::now());
        engine::write(self.ctx.repositories.as_ref(), self.repository, &*self.status).await
    }

    async fn check_generation(&self, stage: Stage) -> Result<(), Abort> {
        engine::check_generation(
            self.ctx.repositories.as_ref(),
            self.repository,
            self.namespace,
            self.name,
            stage,
        )
        .await
    }

    fn fail<E>(&mut self, stage: Stage, error: &E, result: Option<&CmdRunResult>) -> Abort
    where
        E: Classify + Display,
    {
        if stage == Stage::Fetch {
            let record = result
                .cloned()
                .unwrap_or_else(|| CmdRunResult::failure(error.to_string()));
            self.status.fetch = Some(record.to_stage_status(self.ctx.status_output_limit));
        }
        StageFailure::new(stage, error, result.cloned()).into()
    }
}

async fn register(
    ctx: &Reconciler,
    namespace: &str,
    repository: &str,
    documents: &PackageDocuments,
) -> Result<(), RegisterError> {
    ctx.registry.register(namespace, repository, documents).await?;
    let pruned = ctx.registry.prune(namespace, repository, documents).await?;
    if pruned > 0 {
        info!(pruned, "removed documents no longer shipped by the repository");
    }
    Ok(())
}

async fn delete_repository(
    repository: &PackageRepository,
    ctx: &Reconciler,
    namespace: &str,
    name: &str,
) -> Result<Action, ReconcilerError> {
    const KIND: &str = PackageRepository::KIND_LABEL;
    if !engine::has_finalizer(repository) {
        return Ok(Action::await_change());
    }

    let started = Utc::now();
    let store = ctx.repositories.as_ref();
    let mut status = mark_deleting(repository.status.as_ref(), started);
    engine::tolerate_gone(engine::write(store, repository, &status).await)?;

    if let Err(e) = ctx
        .registry
        .prune(namespace, name, &PackageDocuments::default())
        .await
    {
        let failure = StageFailure::new(Stage::Delete, &e, None);
        warn!("PackageRepository {namespace}/{name} delete failed: {}", failure.message);
        mark_delete_failed(&mut status, &failure, started, Utc::now());
        engine::tolerate_gone(engine::write(store, repository, &status).await)?;
        metrics::increment_reconciliation_errors(KIND, Stage::Delete.as_str(), failure.class.as_str());
        return Ok(engine::failure_action(
            KIND,
            &failure,
            status.attempt.consecutive_reconcile_failures,
            &ctx.backoff,
        ));
    }

    engine::remove_finalizer(store, repository).await?;
    metrics::remove_packages_registered(namespace, name);
    metrics::increment_deletions(KIND);
    info!("PackageRepository {namespace}/{name} deleted");
    Ok(Action::await_change())
}
