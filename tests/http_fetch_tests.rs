//! # HTTP Fetch Tests
//!
//! Apps fetching from a local axum server.

mod common;

use app_controller::controller::reconciler::reconcile_app;
use app_controller::crd::{App, ConditionType};
use axum::{http::StatusCode, routing::get, Router};
use common::*;
use kube_runtime::controller::Action;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const CONFIG_MAP: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: served\n";

/// Serve `/config.yaml` and a `/broken` route answering 500
async fn serve() -> SocketAddr {
    let router = Router::new()
        .route("/config.yaml", get(|| async { CONFIG_MAP }))
        .route(
            "/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn http_app(http: serde_json::Value) -> App {
    app(json!({
        "apiVersion": "apps.octopilot.io/v1alpha1",
        "kind": "App",
        "metadata": metadata("served", 1),
        "spec": { "fetch": [{ "http": http }] },
    }))
}

#[tokio::test]
async fn test_plain_file_is_deployed() {
    let addr = serve().await;
    let harness = Harness::new(FakeRunner::default(), FakeDeployer::default());
    let app = http_app(json!({ "url": format!("http://{addr}/config.yaml") }));

    let action = reconcile_app(Arc::new(app), Arc::clone(&harness.ctx))
        .await
        .unwrap();

    assert_eq!(action, Action::await_change());
    assert_eq!(harness.deployer.manifests(), vec![CONFIG_MAP.to_string()]);
    // A plain file needs no extraction
    assert!(harness.runner.calls().is_empty());
    let status = harness.apps.last_status();
    assert!(status.generic.is_true(ConditionType::ReconcileSucceeded));
    assert!(status
        .fetch
        .as_ref()
        .is_some_and(|f| f.stdout.contains("/config.yaml")));
}

#[tokio::test]
async fn test_server_error_fails_fetch_with_backoff() {
    let addr = serve().await;
    let harness = Harness::new(FakeRunner::default(), FakeDeployer::default());
    let app = http_app(json!({ "url": format!("http://{addr}/broken") }));

    let action = reconcile_app(Arc::new(app), Arc::clone(&harness.ctx))
        .await
        .unwrap();

    assert_eq!(action, Action::requeue(Duration::from_secs(30)));
    assert!(harness.deployer.manifests().is_empty());
    let status = harness.apps.last_status();
    let failed = status.generic.condition(ConditionType::ReconcileFailed).unwrap();
    assert_eq!(failed.reason.as_deref(), Some("FetchFailed"));
    assert!(status
        .generic
        .useful_error_message
        .as_deref()
        .is_some_and(|m| m.contains("HTTP 500")));
    assert!(status
        .generic
        .friendly_description
        .as_deref()
        .is_some_and(|d| d.starts_with("Fetching failed: HTTP 500")));
    assert_eq!(status.attempt.last_failure_retryable, Some(true));
}

#[tokio::test]
async fn test_checksum_mismatch_waits_for_a_change() {
    let addr = serve().await;
    let harness = Harness::new(FakeRunner::default(), FakeDeployer::default());
    let wrong = format!("{:x}", Sha256::digest(b"something else"));
    let app = http_app(json!({
        "url": format!("http://{addr}/config.yaml"),
        "sha256": wrong,
    }));

    let action = reconcile_app(Arc::new(app), Arc::clone(&harness.ctx))
        .await
        .unwrap();

    assert_eq!(action, Action::await_change());
    let status = harness.apps.last_status();
    assert!(status
        .generic
        .useful_error_message
        .as_deref()
        .is_some_and(|m| m.contains("checksum mismatch")));
    assert_eq!(status.attempt.last_failure_retryable, Some(false));
}

#[tokio::test]
async fn test_matching_checksum_is_accepted() {
    let addr = serve().await;
    let harness = Harness::new(FakeRunner::default(), FakeDeployer::default());
    let digest = format!("{:x}", Sha256::digest(CONFIG_MAP.as_bytes()));
    let app = http_app(json!({
        "url": format!("http://{addr}/config.yaml"),
        "sha256": digest,
    }));

    reconcile_app(Arc::new(app), Arc::clone(&harness.ctx))
        .await
        .unwrap();

    assert!(harness
        .apps
        .last_status()
        .generic
        .is_true(ConditionType::ReconcileSucceeded));
}
