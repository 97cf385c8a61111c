//! # Package Repository Commands
//!
//! `package repository add` and `package repository update`.

use super::{RepositoryTarget, WaitFlags};
use anyhow::{Context, Result};
use app_controller::client::{
    add_or_update, wait_for_reconcile, AddOrUpdate, DedupingMessages, KubeStatusSource,
};
use app_controller::crd::PackageRepository;
use kube::{api::Api, Client};

/// Create or update a package repository, then optionally wait for it
pub async fn add_or_update_command(
    client: Client,
    namespace: &str,
    target: &RepositoryTarget,
    create: bool,
    wait: &WaitFlags,
) -> Result<()> {
    let name = target.name()?;
    let api: Api<PackageRepository> = Api::namespaced(client, namespace);

    let outcome = add_or_update(&api, namespace, name, &target.url, create)
        .await
        .with_context(|| format!("Failed to add or update package repository '{namespace}/{name}'"))?;

    match outcome {
        AddOrUpdate::Created => {
            println!("📦 Package repository '{namespace}/{name}' created");
        }
        AddOrUpdate::Updated => {
            println!("📦 Package repository '{namespace}/{name}' updated");
        }
    }
    println!("   URL: {}", target.url);

    if !wait.wait {
        return Ok(());
    }

    match outcome {
        AddOrUpdate::Created => println!("⏳ Waiting for package repository to be added"),
        AddOrUpdate::Updated => println!("⏳ Waiting for package repository to be updated"),
    }

    let source = KubeStatusSource::new(api, name);
    let mut messages = DedupingMessages::default();
    wait_for_reconcile(&source, wait.poll_interval, wait.poll_timeout, &mut messages).await?;

    println!("✅ Package repository '{namespace}/{name}' reconciled");
    Ok(())
}
