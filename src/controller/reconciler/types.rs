//! # Reconciler Types
//!
//! The shared reconciliation context and the errors handed back to the kube
//! runtime.

use super::registry::{KubeRegistry, PackageRegistry};
use super::store::{KubeStore, ResourceStore, StoreError};
use crate::config::ControllerConfig;
use crate::constants::DEPLOY_PROGRESS_WRITE_INTERVAL_MS;
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::deploy::{Deployer, KappDeployer};
use crate::controller::fetch::{HttpFetcher, KubeLookup, Resolver};
use crate::controller::in_flight::InFlight;
use crate::controller::template::TemplatePipeline;
use crate::crd::{App, PackageRepository};
use crate::exec::{CommandRunner, ProcessRunner};
use kube::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Infrastructure failure the engine could not turn into a status write
///
/// Stage failures never surface here; they end in a `ReconcileFailed` status.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("status store: {0}")]
    Store(#[from] StoreError),
    #[error("{kind} {name} has no namespace")]
    MissingNamespace { kind: &'static str, name: String },
}

/// What caused an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// `metadata.generation` differs from `status.observedGeneration`
    SpecChange,
    /// Sync period elapsed after a success
    SyncPeriod,
    /// Backoff delay elapsed after a retryable failure
    BackoffRetry,
    /// Reconcile trigger annotation changed
    Manual,
    /// A previous attempt was interrupted before it committed
    Interrupted,
}

impl TriggerSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::SpecChange => "spec-change",
            TriggerSource::SyncPeriod => "sync-period",
            TriggerSource::BackoffRetry => "backoff-retry",
            TriggerSource::Manual => "manual",
            TriggerSource::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context shared by every reconciliation
///
/// Collaborators sit behind traits so integration tests can swap in fakes.
#[derive(Clone)]
pub struct Reconciler {
    pub apps: Arc<dyn ResourceStore<App>>,
    pub repositories: Arc<dyn ResourceStore<PackageRepository>>,
    pub resolver: Arc<Resolver>,
    pub pipeline: Arc<TemplatePipeline>,
    pub deployer: Arc<dyn Deployer>,
    pub registry: Arc<dyn PackageRegistry>,
    pub backoff: ExponentialBackoff,
    pub in_flight: InFlight,
    /// Process-wide shutdown; every attempt's token is a child of it
    pub shutdown: CancellationToken,
    /// Parent of the per-attempt scratch directories
    pub scratch_root: PathBuf,
    /// Bytes of stdout / stderr kept per stage record
    pub status_output_limit: usize,
    /// Minimum spacing between deploy progress status writes
    pub progress_write_interval: Duration,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("backoff", &self.backoff)
            .field("scratch_root", &self.scratch_root)
            .field("status_output_limit", &self.status_output_limit)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Wire the cluster-backed collaborators from `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the http fetch client cannot be built
    pub fn new(
        client: Client,
        config: &ControllerConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, reqwest::Error> {
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
        let http = HttpFetcher::new(
            config.http_fetch_timeout(),
            Arc::clone(&runner),
            config.tools.tar.clone(),
        )?;
        let resolver = Resolver::new(
            Arc::new(KubeLookup::new(client.clone())),
            Arc::clone(&runner),
            http,
            config.tools.clone(),
        );

        Ok(Self {
            apps: Arc::new(KubeStore::<App>::new(client.clone())),
            repositories: Arc::new(KubeStore::<PackageRepository>::new(client.clone())),
            resolver: Arc::new(resolver),
            pipeline: Arc::new(TemplatePipeline::new(
                Arc::clone(&runner),
                config.tools.clone(),
            )),
            deployer: Arc::new(KappDeployer::new(runner, config.tools.kapp.clone())),
            registry: Arc::new(KubeRegistry::new(client)),
            backoff: config.backoff(),
            in_flight: InFlight::new(),
            shutdown,
            scratch_root: config.scratch_dir.clone(),
            status_output_limit: config.status_output_limit_bytes,
            progress_write_interval: Duration::from_millis(DEPLOY_PROGRESS_WRITE_INTERVAL_MS),
        })
    }
}
