//! # Watch Loop
//!
//! One kube-runtime controller per reconciled kind. Every watch event hands
//! the resource to the engine, which decides from the resource alone whether
//! anything is due, so status-only updates cost one decision and no work.

use crate::config::ControllerConfig;
use crate::controller::reconciler::{
    reconcile_app, reconcile_package_repository, Reconciler, ReconcilerError,
};
use crate::crd::{App, PackageRepository, Reconcilable};
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::server::ServerState;
use futures::StreamExt;
use kube::api::Api;
use kube::Client;
use kube_runtime::controller::{self, Action};
use kube_runtime::{watcher, Controller};
use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Run the App and PackageRepository controllers until shutdown
///
/// # Errors
///
/// Currently infallible; kept fallible for the binary's `main`
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    config: &ControllerConfig,
) -> Result<(), anyhow::Error> {
    let shutdown = reconciler.shutdown.clone();
    let shutdown_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal, initiating graceful shutdown...");
        shutdown_state.set_ready(false);
        // Running fetch / template steps stop; deploys run to completion
        shutdown.cancel();
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    tokio::join!(
        watch_kind(
            Api::<App>::all(client.clone()),
            reconcile_app,
            Arc::clone(&reconciler),
            config,
        ),
        watch_kind(
            Api::<PackageRepository>::all(client),
            reconcile_package_repository,
            Arc::clone(&reconciler),
            config,
        ),
    );

    info!("Controller stopped gracefully");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Watch one kind, restarting the watch when its stream ends
async fn watch_kind<K, F, Fut>(
    api: Api<K>,
    reconcile: F,
    reconciler: Arc<Reconciler>,
    config: &ControllerConfig,
) where
    K: Reconcilable,
    F: FnMut(Arc<K>, Arc<Reconciler>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<Action, ReconcilerError>> + Send + 'static,
{
    let backoff_start_ms = config.backoff_base_secs.saturating_mul(1000);
    let max_backoff_ms = config.backoff_max_secs.saturating_mul(1000);
    let restart_delay = config.watch_restart_delay_duration();
    let concurrency = u16::try_from(config.max_concurrent_reconciliations).unwrap_or(u16::MAX);
    let backoff = Arc::new(AtomicU64::new(backoff_start_ms));

    loop {
        if reconciler.shutdown.is_cancelled() {
            info!(resource.kind = K::KIND_LABEL, "Shutdown requested, exiting watch loop");
            break;
        }

        let span = info_span!("controller.watch", resource.kind = K::KIND_LABEL);
        let stream_backoff = Arc::clone(&backoff);
        let shutdown = reconciler.shutdown.clone();
        let controller = Controller::new(api.clone(), watcher::Config::default().any_semantic())
            .with_config(controller::Config::default().concurrency(concurrency))
            .graceful_shutdown_on(async move { shutdown.cancelled().await })
            .run(
                reconcile.clone(),
                handle_reconciliation_error::<K>,
                Arc::clone(&reconciler),
            )
            .filter_map(move |event| {
                let backoff = Arc::clone(&stream_backoff);
                async move {
                    match &event {
                        Ok((object, action)) => {
                            backoff.store(backoff_start_ms, std::sync::atomic::Ordering::Relaxed);
                            debug!(object = %object, ?action, "watch.event.reconciled");
                            Some(event)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                K::KIND_LABEL,
                                &error_string,
                                &backoff,
                                max_backoff_ms,
                                restart_delay,
                            )
                            .await
                            .map(|()| event)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()));

        info!("Starting {} controller watch...", K::KIND_LABEL);
        controller.instrument(span).await;

        if reconciler.shutdown.is_cancelled() {
            info!(resource.kind = K::KIND_LABEL, "Shutdown requested, exiting watch loop");
            break;
        }

        let delay = config.watch_restart_delay_after_end_duration();
        warn!(
            "{} watch stream ended, restarting in {} seconds...",
            K::KIND_LABEL,
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    }
}
