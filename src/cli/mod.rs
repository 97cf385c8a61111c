//! # APPCTL CLI
//!
//! Command-line interface for the App Controller.
//!
//! ## Usage
//!
//! ```bash
//! # Add a package repository and wait for it to reconcile
//! appctl package repository add -r tanzu-core --url registry.example.com/packages/core:1.2.0
//!
//! # Point an existing repository at a new bundle, creating it if missing
//! appctl package repository update -r tanzu-core --url registry.example.com/packages/core --create
//!
//! # Trigger reconciliation of an App
//! appctl app kick my-app
//!
//! # Pause and resume an App
//! appctl app pause my-app
//! appctl app resume my-app
//!
//! # Show status of an App
//! appctl app status my-app --namespace apps
//! ```

use anyhow::{Context, Result};
use app_controller::controller::reconciler::parse_kubernetes_duration;
use clap::{ArgAction, Args, Parser, Subcommand};
use kube::Client;
use std::time::Duration;

mod app;
mod repository;

/// App Controller CLI
#[derive(Parser)]
#[command(name = "appctl")]
#[command(
    about = "App Controller CLI",
    long_about = None,
    after_help = "\
Examples:
  appctl package repository add -r core --url registry.example.com/packages/core
  appctl app kick my-app
  appctl app status my-app --namespace apps
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes namespace
    #[arg(short, long, global = true, default_value = "default")]
    namespace: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage packages
    Package {
        #[command(subcommand)]
        command: PackageCommands,
    },
    /// Manage Apps
    App {
        #[command(subcommand)]
        command: AppCommands,
    },
}

#[derive(Subcommand)]
enum PackageCommands {
    /// Manage package repositories
    Repository {
        #[command(subcommand)]
        command: RepositoryCommands,
    },
}

#[derive(Subcommand)]
enum RepositoryCommands {
    /// Add a package repository
    Add {
        #[command(flatten)]
        target: RepositoryTarget,

        #[command(flatten)]
        wait: WaitFlags,
    },
    /// Update a package repository
    Update {
        #[command(flatten)]
        target: RepositoryTarget,

        /// Create the package repository if it does not exist
        #[arg(long)]
        create: bool,

        #[command(flatten)]
        wait: WaitFlags,
    },
}

#[derive(Args)]
struct RepositoryTarget {
    /// Package repository name
    #[arg(value_name = "NAME", conflicts_with = "repository")]
    name: Option<String>,

    /// Package repository name
    #[arg(short = 'r', long)]
    repository: Option<String>,

    /// OCI registry url of the package repository bundle
    #[arg(long)]
    url: String,
}

impl RepositoryTarget {
    fn name(&self) -> Result<&str> {
        self.name
            .as_deref()
            .or(self.repository.as_deref())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Package repository name is required.\n\n\
                    Example: appctl package repository add -r core --url registry.example.com/packages/core"
                )
            })
    }
}

#[derive(Args)]
struct WaitFlags {
    /// Wait for the reconciliation to complete
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    wait: bool,

    /// Time between status checks
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    poll_interval: Duration,

    /// Give up waiting after this long
    #[arg(long, default_value = "5m", value_parser = parse_duration)]
    poll_timeout: Duration,
}

#[derive(Subcommand)]
enum AppCommands {
    /// Trigger reconciliation for an App
    Kick {
        /// Name of the App resource
        #[arg(value_name = "NAME")]
        name: String,
    },
    /// Pause reconciliation for an App
    Pause {
        /// Name of the App resource
        #[arg(value_name = "NAME")]
        name: String,
    },
    /// Resume reconciliation for an App
    Resume {
        /// Name of the App resource
        #[arg(value_name = "NAME")]
        name: String,
    },
    /// Show status of an App
    Status {
        /// Name of the App resource
        #[arg(value_name = "NAME")]
        name: String,
    },
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    parse_kubernetes_duration(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Required for rustls 0.23+ before the Kubernetes client connects
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "appctl=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig is configured.")?;

    match cli.command {
        Commands::Package {
            command: PackageCommands::Repository { command },
        } => match command {
            RepositoryCommands::Add { target, wait } => {
                repository::add_or_update_command(client, &cli.namespace, &target, true, &wait)
                    .await
            }
            RepositoryCommands::Update {
                target,
                create,
                wait,
            } => {
                repository::add_or_update_command(client, &cli.namespace, &target, create, &wait)
                    .await
            }
        },
        Commands::App { command } => match command {
            AppCommands::Kick { name } => app::kick_command(client, &name, &cli.namespace).await,
            AppCommands::Pause { name } => {
                app::set_paused_command(client, &name, &cli.namespace, true).await
            }
            AppCommands::Resume { name } => {
                app::set_paused_command(client, &name, &cli.namespace, false).await
            }
            AppCommands::Status { name } => {
                app::status_command(client, &name, &cli.namespace).await
            }
        },
    }
}
