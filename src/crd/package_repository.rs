//! # PackageRepository
//!
//! A fetchable bundle of `Package` / `PackageMetadata` documents. The
//! controller fetches it, validates the documents and registers them in the
//! cluster labeled with the repository name.

use super::fetch::AppFetch;
use super::status::{AttemptStatus, GenericStatus, ReconcileStatus, StageStatus};
use super::Reconcilable;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "packaging.octopilot.io",
    version = "v1alpha1",
    kind = "PackageRepository",
    namespaced,
    status = "PackageRepositoryStatus",
    shortname = "pkgr",
    printcolumn = r#"{"name":"Description","type":"string","jsonPath":".status.friendlyDescription"}"#,
    printcolumn = r#"{"name":"Packages","type":"integer","jsonPath":".status.packagesRegistered"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PackageRepositorySpec {
    pub fetch: AppFetch,
    #[serde(default)]
    pub paused: bool,
    /// Re-fetch period; unset reacts to spec changes only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_period: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PackageRepositoryStatus {
    #[serde(flatten)]
    pub generic: GenericStatus,
    #[serde(flatten)]
    pub attempt: AttemptStatus,
    #[serde(default)]
    pub fetch: Option<StageStatus>,
    /// Number of Package and PackageMetadata documents currently registered
    #[serde(default)]
    pub packages_registered: u32,
}

impl ReconcileStatus for PackageRepositoryStatus {
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

impl Reconcilable for PackageRepository {
    const KIND_LABEL: &'static str = "PackageRepository";
    const FINALIZER: &'static str = crate::constants::PACKAGE_REPOSITORY_FINALIZER;

    fn paused(&self) -> bool {
        self.spec.paused
    }

    fn canceled(&self) -> bool {
        false
    }

    fn sync_period(&self) -> Option<&str> {
        self.spec.sync_period.as_deref()
    }
}
