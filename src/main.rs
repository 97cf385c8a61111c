//! # App Controller
//!
//! A Kubernetes controller that continuously reconciles `App` and
//! `PackageRepository` resources.
//!
//! ## Overview
//!
//! For every `App` the controller:
//!
//! 1. **Fetches** content from inline data, images, imgpkg bundles, HTTP archives, git or Helm charts
//! 2. **Templates** it through ytt, kbld, helm and kustomize steps into one manifest
//! 3. **Deploys** the manifest with `kapp` and reports progress on the status
//!
//! Every `PackageRepository` is fetched, and the `Package` / `PackageMetadata`
//! documents it contains are registered in the cluster.
//!
//! Failed attempts are retried with exponential backoff, successful ones are
//! repeated on the resource's sync period to correct drift.

use anyhow::Result;
use app_controller::runtime::{initialize, run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    run_watch_loop(
        init.client,
        init.reconciler,
        init.server_state,
        &init.config,
    )
    .await
}
