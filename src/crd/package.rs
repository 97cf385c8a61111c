//! # Package and PackageMetadata
//!
//! Documents shipped inside a PackageRepository and registered by the
//! controller. A `Package` is one version of an installable App template;
//! `PackageMetadata` describes the package across versions.

use super::app::AppSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "data.packaging.octopilot.io",
    version = "v1alpha1",
    kind = "Package",
    namespaced,
    printcolumn = r#"{"name":"Package","type":"string","jsonPath":".spec.refName"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PackageSpec {
    /// Fully qualified package name, e.g. `cert-manager.community.example.com`
    pub ref_name: String,
    /// Semver version of this package
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
    /// App spec installed for this version
    #[serde(default)]
    pub template: PackageTemplate,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct PackageTemplate {
    #[serde(default)]
    pub spec: AppSpec,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "data.packaging.octopilot.io",
    version = "v1alpha1",
    kind = "PackageMetadata",
    namespaced,
    printcolumn = r#"{"name":"Display-Name","type":"string","jsonPath":".spec.displayName"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadataSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Maintainer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Maintainer {
    pub name: String,
}
