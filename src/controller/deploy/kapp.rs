//! # kapp
//!
//! [`Deployer`] backed by the `kapp` CLI. The manifest goes to `kapp deploy`
//! on stdin; stdout lines are forwarded as progress.

use super::{DeployEvent, Deployer};
use crate::crd::KappOptions;
use crate::exec::{CmdRunResult, CommandRunner, CommandSpec};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{debug, info};

/// stderr fragment kapp prints when asked to delete an unknown app
const APP_NOT_FOUND: &str = "does not exist";

pub struct KappDeployer {
    runner: Arc<dyn CommandRunner>,
    kapp: String,
}

impl std::fmt::Debug for KappDeployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KappDeployer")
            .field("kapp", &self.kapp)
            .finish_non_exhaustive()
    }
}

impl KappDeployer {
    pub fn new(runner: Arc<dyn CommandRunner>, kapp: impl Into<String>) -> Self {
        Self {
            runner,
            kapp: kapp.into(),
        }
    }

    fn base(&self, command: &str, app_name: &str, namespace: &str) -> CommandSpec {
        CommandSpec::new(&self.kapp)
            .arg(command)
            .args(["-a", app_name, "-n", namespace, "--tty=false"])
    }

    /// Run `spec`, forwarding stdout lines as progress snapshots
    async fn run_with_progress(
        &self,
        spec: &CommandSpec,
        events: &UnboundedSender<DeployEvent>,
    ) -> CmdRunResult {
        // A closed receiver only means nobody watches progress
        let _ = events.send(DeployEvent::Started);
        let started = Utc::now();

        let (line_tx, mut line_rx) = unbounded_channel::<String>();
        let runner = &self.runner;
        let run = async move {
            let result = runner.run(spec, None, Some(&line_tx)).await;
            drop(line_tx);
            result
        };
        let forward = async {
            let mut stdout = String::new();
            while let Some(line) = line_rx.recv().await {
                stdout.push_str(&line);
                stdout.push('\n');
                let mut snapshot = CmdRunResult::started(started);
                snapshot.stdout.clone_from(&stdout);
                let _ = events.send(DeployEvent::Progress(snapshot));
            }
        };

        let (result, ()) = tokio::join!(run, forward);
        result
    }
}

#[async_trait]
impl Deployer for KappDeployer {
    async fn deploy(
        &self,
        manifest: &str,
        app_name: &str,
        namespace: &str,
        opts: &KappOptions,
        events: &UnboundedSender<DeployEvent>,
    ) -> CmdRunResult {
        let mut spec = self
            .base("deploy", app_name, namespace)
            .args(["-f", "-", "--yes", "--diff-changes"])
            .stdin(manifest.as_bytes());
        if let Some(into_ns) = &opts.into_ns {
            spec = spec.arg("--into-ns").arg(into_ns);
        }
        spec = spec.args(opts.raw_options.iter().cloned());

        info!(app = app_name, namespace, bytes = manifest.len(), "kapp deploy");
        let result = self.run_with_progress(&spec, events).await;
        debug!(app = app_name, exit_code = result.exit_code, "kapp deploy finished");
        result
    }

    async fn delete(
        &self,
        app_name: &str,
        namespace: &str,
        opts: &KappOptions,
        events: &UnboundedSender<DeployEvent>,
    ) -> CmdRunResult {
        let mut spec = self.base("delete", app_name, namespace).arg("--yes");
        if let Some(delete) = &opts.delete {
            spec = spec.args(delete.raw_options.iter().cloned());
        }

        info!(app = app_name, namespace, "kapp delete");
        let mut result = self.run_with_progress(&spec, events).await;
        if !result.is_success() && result.stderr.contains(APP_NOT_FOUND) {
            debug!(app = app_name, "kapp app already absent");
            result.exit_code = 0;
            result.error = None;
        }
        result
    }

    async fn inspect(
        &self,
        app_name: &str,
        namespace: &str,
        opts: &KappOptions,
    ) -> CmdRunResult {
        let mut spec = self.base("inspect", app_name, namespace).arg("--tree");
        if let Some(inspect) = &opts.inspect {
            spec = spec.args(inspect.raw_options.iter().cloned());
        }
        self.runner.run(&spec, None, None).await
    }
}
