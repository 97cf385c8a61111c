//! # Initialization
//!
//! Controller initialization: rustls setup, tracing, metrics, probe server,
//! Kubernetes client and the reconciliation context.

use crate::config::ControllerConfig;
use crate::constants::{DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS};
use crate::controller::reconciler::{phase, Reconciler};
use crate::crd::{App, PackageRepository, Reconcilable};
use crate::observability;
use crate::server::{start_server, ServerState};
use anyhow::{Context, Result};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
    pub config: ControllerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// # Errors
///
/// Returns an error if metrics cannot be registered, the probe server does
/// not come up, or no Kubernetes client can be built
pub async fn initialize() -> Result<InitializationResult> {
    // Required for rustls 0.23+ before any TLS connection is made
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    let config = ControllerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_directive().into()),
        )
        .init();

    info!("Starting App Controller");
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());
    let server_handle = {
        let state = Arc::clone(&server_state);
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_server(port, state).await {
                error!("HTTP server error: {}", e);
            }
        })
    };
    wait_for_server_ready(&server_state, &server_handle).await?;

    for (tool, path) in config.tools.missing() {
        warn!(tool, path, "external tool not found on PATH; stages using it will fail");
    }

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let reconciler = Arc::new(
        Reconciler::new(client.clone(), &config, CancellationToken::new())
            .context("Failed to build reconciliation context")?,
    );

    summarize_existing::<App>(&client)
        .instrument(info_span!("controller.startup.summary", resource.kind = App::KIND_LABEL))
        .await;
    summarize_existing::<PackageRepository>(&client)
        .instrument(info_span!(
            "controller.startup.summary",
            resource.kind = PackageRepository::KIND_LABEL
        ))
        .await;

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
        config,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &ServerState,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(DEFAULT_SERVER_STARTUP_TIMEOUT_SECS);
    let poll_interval = Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.is_ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Log existing resources by namespace and phase
///
/// The watch picks every one of them up on its initial list; this only
/// checks the CRD is installed and gives operators a startup summary.
async fn summarize_existing<K: Reconcilable>(client: &Client) {
    let api: Api<K> = Api::all(client.clone());

    match api.list(&ListParams::default()).await {
        Ok(list) => {
            let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for item in &list.items {
                by_namespace
                    .entry(item.namespace().unwrap_or_default())
                    .or_default()
                    .push(format!("{} ({})", item.name_any(), phase(item)));
            }

            info!(
                "CRD is queryable, found {} existing {} resources in {} namespaces",
                list.items.len(),
                K::KIND_LABEL,
                by_namespace.len()
            );
            for (namespace, mut resources) in by_namespace {
                resources.sort();
                let shown = if resources.len() <= 3 {
                    resources.join(", ")
                } else {
                    format!("{}, ... ({} total)", resources[..3].join(", "), resources.len())
                };
                info!("  {namespace}: {shown}");
            }
        }
        Err(e) => {
            error!("{} CRD is not queryable; {:?}. Is the CRD installed?", K::KIND_LABEL, e);
            error!("Installation: crdgen | kubectl apply -f -");
            warn!("Continuing; the watch will retry until the CRD appears");
        }
    }
}
