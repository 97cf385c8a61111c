//! # PackageRepository Reconciliation Tests
//!
//! Fetch, unpack and register against in-memory fakes.

mod common;

use app_controller::constants::PACKAGE_REPOSITORY_FINALIZER;
use app_controller::controller::reconciler::reconcile_package_repository;
use app_controller::crd::{ConditionType, PackageRepository};
use common::*;
use kube_runtime::controller::Action;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const PACKAGES: &str = r"
apiVersion: data.packaging.octopilot.io/v1alpha1
kind: Package
metadata:
  name: pkg.example.com.1.0.0
spec:
  refName: pkg.example.com
  version: 1.0.0
  template:
    spec:
      fetch:
      - imgpkgBundle:
          image: registry.example.com/packages/pkg:1.0.0
      deploy:
        kapp: {}
---
apiVersion: data.packaging.octopilot.io/v1alpha1
kind: PackageMetadata
metadata:
  name: pkg.example.com
spec:
  displayName: Example Package
";

fn repository(extra_metadata: serde_json::Value) -> PackageRepository {
    let mut value = json!({
        "apiVersion": "packaging.octopilot.io/v1alpha1",
        "kind": "PackageRepository",
        "metadata": metadata("core", 1),
        "spec": {
            "fetch": { "imgpkgBundle": { "image": "registry.example.com/packages/core:1.0.0" } },
        },
    });
    if let (Some(meta), Some(extra)) = (
        value["metadata"].as_object_mut(),
        extra_metadata.as_object(),
    ) {
        meta.extend(extra.clone());
    }
    package_repository(value)
}

#[tokio::test]
async fn test_repository_registers_and_prunes() {
    let registry = FakeRegistry::default();
    registry.seed("core", &["pkg.example.com.0.9.0"]);
    let harness = Harness::build(
        FakeRunner::with_content(&[("packages/pkg.yml", PACKAGES)]),
        FakeDeployer::default(),
        registry,
        FakeLookup::default(),
    );

    let action = reconcile_package_repository(
        Arc::new(repository(json!({}))),
        Arc::clone(&harness.ctx),
    )
    .await
    .unwrap();

    assert_eq!(action, Action::await_change());
    assert_eq!(harness.runner.programs(), vec!["vendir"]);
    let registered: Vec<String> = harness.registry.registered("core").into_iter().collect();
    assert_eq!(registered, vec!["pkg.example.com", "pkg.example.com.1.0.0"]);
    assert!(holds_finalizer::<PackageRepository>(
        &harness.repositories.finalizer_writes()
    ));

    let status = harness.repositories.last_status();
    assert!(status.generic.is_true(ConditionType::ReconcileSucceeded));
    assert_eq!(status.packages_registered, 2);
    assert_eq!(status.generic.observed_generation, Some(1));
    assert_eq!(
        status.generic.friendly_description.as_deref(),
        Some("Reconcile succeeded")
    );

    // Stage progress went through Fetching, Unpacking and Registering
    let stages: Vec<Option<String>> = harness
        .repositories
        .statuses()
        .into_iter()
        .map(|s| s.generic.friendly_description)
        .collect();
    for stage in ["Fetching", "Unpacking", "Registering"] {
        assert!(stages.contains(&Some(stage.to_string())), "missing {stage}");
    }
}

#[tokio::test]
async fn test_misnamed_package_fails_unpack() {
    let harness = Harness::new(
        FakeRunner::with_content(&[(
            "pkg.yml",
            &PACKAGES.replace("pkg.example.com.1.0.0", "pkg-1.0.0"),
        )]),
        FakeDeployer::default(),
    );

    let action = reconcile_package_repository(
        Arc::new(repository(json!({}))),
        Arc::clone(&harness.ctx),
    )
    .await
    .unwrap();

    assert_eq!(action, Action::await_change());
    assert!(harness.registry.registered("core").is_empty());
    let status = harness.repositories.last_status();
    let failed = status.generic.condition(ConditionType::ReconcileFailed).unwrap();
    assert_eq!(failed.reason.as_deref(), Some("UnpackFailed"));
    assert!(status
        .generic
        .useful_error_message
        .as_deref()
        .is_some_and(|m| m.contains("pkg.example.com.1.0.0")));
    assert_eq!(status.packages_registered, 0);
}

#[tokio::test]
async fn test_package_owned_elsewhere_is_not_retried() {
    let mut registry = FakeRegistry::default();
    registry
        .foreign
        .insert("pkg.example.com.1.0.0".to_string(), "other".to_string());
    let harness = Harness::build(
        FakeRunner::with_content(&[("pkg.yml", PACKAGES)]),
        FakeDeployer::default(),
        registry,
        FakeLookup::default(),
    );

    let action = reconcile_package_repository(
        Arc::new(repository(json!({}))),
        Arc::clone(&harness.ctx),
    )
    .await
    .unwrap();

    assert_eq!(action, Action::await_change());
    let status = harness.repositories.last_status();
    let failed = status.generic.condition(ConditionType::ReconcileFailed).unwrap();
    assert_eq!(failed.reason.as_deref(), Some("RegisterFailed"));
    assert_eq!(status.attempt.last_failure_retryable, Some(false));
    assert!(status
        .generic
        .useful_error_message
        .as_deref()
        .is_some_and(|m| m.contains("'other'")));
}

#[tokio::test]
async fn test_fetch_failure_is_retried() {
    let harness = Harness::new(
        FakeRunner::default().failing("vendir", "vendir: Error: Fetching image: UNAUTHORIZED"),
        FakeDeployer::default(),
    );

    let action = reconcile_package_repository(
        Arc::new(repository(json!({}))),
        Arc::clone(&harness.ctx),
    )
    .await
    .unwrap();

    assert_eq!(action, Action::requeue(Duration::from_secs(30)));
    let status = harness.repositories.last_status();
    let failed = status.generic.condition(ConditionType::ReconcileFailed).unwrap();
    assert_eq!(failed.reason.as_deref(), Some("FetchFailed"));
    assert!(status
        .fetch
        .as_ref()
        .is_some_and(|f| f.stderr.contains("UNAUTHORIZED")));
}

#[tokio::test]
async fn test_paused_repository_is_skipped() {
    let harness = Harness::new(FakeRunner::default(), FakeDeployer::default());
    let mut repo = repository(json!({}));
    repo.spec.paused = true;

    let action = reconcile_package_repository(Arc::new(repo), Arc::clone(&harness.ctx))
        .await
        .unwrap();

    assert_eq!(action, Action::await_change());
    assert!(harness.runner.calls().is_empty());
    assert_eq!(
        harness.repositories.last_status().generic.friendly_description.as_deref(),
        Some("Paused")
    );
}

#[tokio::test]
async fn test_delete_unregisters_everything() {
    let registry = FakeRegistry::default();
    registry.seed("core", &["pkg.example.com", "pkg.example.com.1.0.0"]);
    let harness = Harness::build(
        FakeRunner::default(),
        FakeDeployer::default(),
        registry,
        FakeLookup::default(),
    );
    let repo = repository(json!({
        "deletionTimestamp": "2026-01-01T00:00:00Z",
        "finalizers": [PACKAGE_REPOSITORY_FINALIZER],
    }));

    let action = reconcile_package_repository(Arc::new(repo), Arc::clone(&harness.ctx))
        .await
        .unwrap();

    assert_eq!(action, Action::await_change());
    assert!(harness.registry.registered("core").is_empty());
    assert!(harness.runner.calls().is_empty());
    assert_eq!(
        harness.repositories.finalizer_writes(),
        vec![Vec::<String>::new()]
    );
}
