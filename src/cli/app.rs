//! # App Commands
//!
//! Kick, pause, resume and status for App resources.

use anyhow::{Context, Result};
use app_controller::constants::RECONCILE_TRIGGER_ANNOTATION;
use app_controller::controller::reconciler::phase;
use app_controller::crd::{App, StageStatus};
use chrono::Utc;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::json;

/// Trigger reconciliation by updating the reconcile annotation
///
/// The controller compares the annotation value with the last one it acted
/// on, so any new value starts one attempt.
pub async fn kick_command(client: Client, name: &str, namespace: &str) -> Result<()> {
    println!("🔄 Triggering reconciliation for App '{namespace}/{name}'...");

    let api: Api<App> = Api::namespaced(client, namespace);
    let app = api
        .get(name)
        .await
        .with_context(|| format!("Failed to get App '{namespace}/{name}'"))?;

    if app.spec.paused {
        println!("   ⚠️  Warning: App is paused. Reconciliation will be skipped.");
        println!("   Use 'appctl app resume {name}' to resume reconciliation.");
    }

    let trigger = Utc::now().to_rfc3339();
    let patch = json!({
        "metadata": {
            "annotations": {
                RECONCILE_TRIGGER_ANNOTATION: trigger
            }
        }
    });

    api.patch(name, &PatchParams::default(), &Patch::Merge(patch))
        .await
        .with_context(|| format!("Failed to trigger reconciliation for App '{namespace}/{name}'"))?;

    println!("✅ Reconciliation triggered successfully");
    println!("   Resource: {namespace}/{name}");
    println!("   Annotation: {RECONCILE_TRIGGER_ANNOTATION}={trigger}");
    Ok(())
}

/// Set `spec.paused`
pub async fn set_paused_command(
    client: Client,
    name: &str,
    namespace: &str,
    paused: bool,
) -> Result<()> {
    if paused {
        println!("⏸️  Pausing reconciliation for App '{namespace}/{name}'...");
    } else {
        println!("▶️  Resuming reconciliation for App '{namespace}/{name}'...");
    }

    let api: Api<App> = Api::namespaced(client, namespace);
    let app = api
        .get(name)
        .await
        .with_context(|| format!("Failed to get App '{namespace}/{name}'"))?;

    if app.spec.paused == paused {
        if paused {
            println!("   ℹ️  App is already paused");
        } else {
            println!("   ℹ️  App is already active (not paused)");
        }
        return Ok(());
    }

    let patch = json!({ "spec": { "paused": paused } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(patch))
        .await
        .with_context(|| format!("Failed to update App '{namespace}/{name}'"))?;

    if paused {
        println!("✅ Reconciliation paused");
        println!("\nTo resume reconciliation, run:");
        println!("   appctl app resume {name} --namespace {namespace}");
    } else {
        println!("✅ Reconciliation resumed");
        println!("\nThe controller will reconcile this App shortly.");
    }
    Ok(())
}

/// Show detailed status of an App
pub async fn status_command(client: Client, name: &str, namespace: &str) -> Result<()> {
    println!("📊 Status for App '{namespace}/{name}'");
    println!();

    let api: Api<App> = Api::namespaced(client, namespace);
    let app = api
        .get(name)
        .await
        .with_context(|| format!("Failed to get App '{namespace}/{name}'"))?;

    println!("Resource Information:");
    println!("  Name: {name}");
    println!("  Namespace: {namespace}");
    if let Some(generation) = app.metadata.generation {
        println!("  Generation: {generation}");
    }
    println!("  Phase: {}", phase(&app));

    println!();
    println!("Spec:");
    println!("  Paused: {}", app.spec.paused);
    println!("  Canceled: {}", app.spec.canceled);
    println!("  Noop Delete: {}", app.spec.noop_delete);
    if let Some(sync_period) = &app.spec.sync_period {
        println!("  Sync Period: {sync_period}");
    }
    println!("  Fetch Entries: {}", app.spec.fetch.len());
    println!("  Template Steps: {}", app.spec.template.len());

    let Some(status) = &app.status else {
        println!();
        println!("Status: No status available (App may not have been reconciled yet)");
        return Ok(());
    };

    println!();
    println!("Status:");
    if let Some(observed) = status.generic.observed_generation {
        println!("  Observed Generation: {observed}");
    }
    if let Some(description) = &status.generic.friendly_description {
        println!("  Description: {description}");
    }
    if let Some(error) = &status.generic.useful_error_message {
        println!("  Error: {error}");
    }
    if let Some(digest) = &status.deployed_digest {
        println!("  Deployed Digest: {digest}");
    }
    if let Some(at) = &status.attempt.last_attempted_at {
        println!("  Last Attempted: {at}");
    }
    println!(
        "  Consecutive Failures: {}",
        status.attempt.consecutive_reconcile_failures
    );
    println!(
        "  Consecutive Successes: {}",
        status.attempt.consecutive_reconcile_successes
    );

    if !status.generic.conditions.is_empty() {
        println!();
        println!("Conditions:");
        for condition in &status.generic.conditions {
            println!("  {}: {:?}", condition.r#type, condition.status);
            if let Some(reason) = &condition.reason {
                println!("    Reason: {reason}");
            }
            if let Some(message) = &condition.message {
                println!("    Message: {message}");
            }
            if let Some(at) = &condition.last_transition_time {
                println!("    Last Transition: {at}");
            }
        }
    }

    for (stage, record) in [
        ("Fetch", &status.fetch),
        ("Template", &status.template),
        ("Deploy", &status.deploy),
        ("Inspect", &status.inspect),
    ] {
        if let Some(record) = record {
            print_stage(stage, record);
        }
    }

    Ok(())
}

fn print_stage(stage: &str, record: &StageStatus) {
    println!();
    println!("{stage}:");
    println!("  Exit Code: {}", record.exit_code);
    if let Some(error) = &record.error {
        println!("  Error: {error}");
    }
    if let Some(finished) = &record.finished_at {
        println!("  Finished: {finished}");
    }
    let output = record.stdout.trim_end();
    if !output.is_empty() {
        println!("  Output:");
        for line in output.lines() {
            println!("    {line}");
        }
    }
}
