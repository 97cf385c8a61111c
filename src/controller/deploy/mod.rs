//! # Deploy Adapter
//!
//! Deploy, delete and inspect of an App's resources through an external
//! declarative-apply tool.
//!
//! Callers receive notifications on an unbounded channel: exactly one
//! [`DeployEvent::Started`] before the tool is spawned, then zero or more
//! [`DeployEvent::Progress`] snapshots while it runs. The terminal result is
//! the return value, so observers always see started, progress, result in
//! that order.

mod kapp;

pub use kapp::KappDeployer;

use crate::controller::error::{Classify, ErrorClass};
use crate::crd::KappOptions;
use crate::exec::CmdRunResult;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

/// Notification emitted while a deploy or delete runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployEvent {
    Started,
    /// Output captured so far
    Progress(CmdRunResult),
}

/// Applies and removes an App's resources
///
/// `deploy` and `delete` are not cancellable: once started they run to
/// completion so the cluster is never left mid-apply.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(
        &self,
        manifest: &str,
        app_name: &str,
        namespace: &str,
        opts: &KappOptions,
        events: &UnboundedSender<DeployEvent>,
    ) -> CmdRunResult;

    /// Idempotent: deleting an app that does not exist succeeds
    async fn delete(
        &self,
        app_name: &str,
        namespace: &str,
        opts: &KappOptions,
        events: &UnboundedSender<DeployEvent>,
    ) -> CmdRunResult;

    /// Read-only view of the deployed resources
    async fn inspect(&self, app_name: &str, namespace: &str, opts: &KappOptions)
        -> CmdRunResult;
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("kapp {operation} failed: {}", .result.error_summary())]
    Failed {
        operation: &'static str,
        result: CmdRunResult,
    },
}

impl DeployError {
    #[must_use]
    pub fn result(&self) -> &CmdRunResult {
        match self {
            DeployError::Failed { result, .. } => result,
        }
    }
}

impl Classify for DeployError {
    fn class(&self) -> ErrorClass {
        // Cluster-side failures (webhooks, quota, API availability) commonly clear up
        ErrorClass::ExternalTool { retryable: true }
    }
}
