//! # App
//!
//! The `App` custom resource: fetch sources, template steps and kapp deploy
//! options, plus the controller-owned status.

use super::fetch::AppFetch;
use super::status::{AttemptStatus, GenericStatus, ReconcileStatus, StageStatus};
use super::template::AppTemplate;
use super::Reconcilable;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "apps.octopilot.io",
    version = "v1alpha1",
    kind = "App",
    namespaced,
    status = "AppStatus",
    shortname = "app",
    printcolumn = r#"{"name":"Description","type":"string","jsonPath":".status.friendlyDescription"}"#,
    printcolumn = r#"{"name":"Since-Deploy","type":"string","jsonPath":".status.lastSucceededAt"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    /// Content sources. A single entry lands at the content root; several
    /// entries land in `0/`, `1/`, ... unless `path` is set.
    pub fetch: Vec<AppFetch>,
    /// Rendering steps, executed in order. Empty passes YAML files through.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub template: Vec<AppTemplate>,
    #[serde(default)]
    pub deploy: AppDeploy,
    /// Steady-state re-apply period (`30s`, `5m`, `1h`). Unset reacts to
    /// spec changes only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_period: Option<String>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub canceled: bool,
    /// Release the finalizer on deletion without deleting cluster resources
    #[serde(default)]
    pub noop_delete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct AppDeploy {
    #[serde(default)]
    pub kapp: KappOptions,
}

/// Options passed through to kapp
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KappOptions {
    /// Namespace resources without an explicit namespace are placed into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub into_ns: Option<String>,
    /// Extra flags for `kapp deploy`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<KappDeleteOptions>,
    /// Run `kapp inspect` after a successful deploy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspect: Option<KappInspectOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KappDeleteOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_options: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KappInspectOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_options: Vec<String>,
}

/// Controller-owned status of an App
///
/// Every field is serialized, including empty ones, so a merge patch of the
/// whole object clears values left over from earlier attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    #[serde(flatten)]
    pub generic: GenericStatus,
    #[serde(flatten)]
    pub attempt: AttemptStatus,
    /// sha256 of the manifest last applied successfully
    #[serde(default)]
    pub deployed_digest: Option<String>,
    #[serde(default)]
    pub fetch: Option<StageStatus>,
    #[serde(default)]
    pub template: Option<StageStatus>,
    #[serde(default)]
    pub deploy: Option<StageStatus>,
    #[serde(default)]
    pub inspect: Option<StageStatus>,
}

impl ReconcileStatus for AppStatus {
    fn generic(&self) -> &GenericStatus {
        &self.generic
    }

    fn generic_mut(&mut self) -> &mut GenericStatus {
        &mut self.generic
    }

    fn attempt(&self) -> &AttemptStatus {
        &self.attempt
    }

    fn attempt_mut(&mut self) -> &mut AttemptStatus {
        &mut self.attempt
    }
}

impl Reconcilable for App {
    const KIND_LABEL: &'static str = "App";
    const FINALIZER: &'static str = crate::constants::APP_FINALIZER;

    fn paused(&self) -> bool {
        self.spec.paused
    }

    fn canceled(&self) -> bool {
        self.spec.canceled
    }

    fn sync_period(&self) -> Option<&str> {
        self.spec.sync_period.as_deref()
    }
}

impl App {
    /// Name of the kapp application backing this App
    #[must_use]
    pub fn kapp_app_name(&self) -> String {
        format!(
            "{}{}",
            kube::ResourceExt::name_any(self),
            crate::constants::KAPP_APP_SUFFIX
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_crd_metadata() {
        let crd = App::crd();
        assert_eq!(crd.spec.group, "apps.octopilot.io");
        assert_eq!(crd.spec.names.kind, "App");
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(
            crd.spec.names.short_names,
            Some(vec!["app".to_string()])
        );
    }

    #[test]
    fn test_status_serializes_empty_fields_for_merge_patch() {
        let json = serde_json::to_value(AppStatus::default()).unwrap();
        let object = json.as_object().unwrap();
        for key in [
            "observedGeneration",
            "usefulErrorMessage",
            "deployedDigest",
            "lastAttemptedAt",
            "fetch",
            "deploy",
        ] {
            assert!(object.contains_key(key), "missing {key}");
            assert!(object[key].is_null(), "{key} should be null");
        }
        assert_eq!(object["consecutiveReconcileFailures"], 0);
    }

    #[test]
    fn test_spec_parses_from_yaml() {
        let app: App = serde_yaml::from_str(
            r"
apiVersion: apps.octopilot.io/v1alpha1
kind: App
metadata:
  name: simple-app
  namespace: default
spec:
  syncPeriod: 5m
  fetch:
  - git:
      url: https://github.com/example/simple-app
      ref: origin/main
    path: src
  template:
  - ytt:
      paths: [src/config]
  - kbld: {}
  deploy:
    kapp:
      intoNs: apps
      rawOptions: [--dangerous-allow-empty-list-of-resources=true]
",
        )
        .unwrap();

        assert_eq!(app.spec.sync_period.as_deref(), Some("5m"));
        assert_eq!(app.spec.fetch.len(), 1);
        assert_eq!(
            app.spec.fetch[0].git.as_ref().unwrap().git_ref.as_deref(),
            Some("origin/main")
        );
        assert_eq!(app.spec.template.len(), 2);
        assert_eq!(app.spec.deploy.kapp.into_ns.as_deref(), Some("apps"));
        assert_eq!(app.kapp_app_name(), "simple-app-ctrl");
        assert!(!app.spec.paused);
    }
}
