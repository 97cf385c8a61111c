//! # Fetch Sources
//!
//! Wire types for `spec.fetch` entries and their conversion into the closed
//! [`FetchSource`] sum type the resolver matches on.
//!
//! On the wire a fetch entry is a struct of six optional fields. Exactly one of
//! them must be set; anything else is rejected before any work is done.

use crate::client::reference::ImageReference;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One entry of `spec.fetch`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppFetch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<FetchInline>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imgpkg_bundle: Option<FetchImgpkgBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<FetchImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<FetchHttp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<FetchGit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_chart: Option<FetchHelmChart>,
    /// Destination directory relative to the content root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Reference to an object in the resource's own namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct LocalObjectReference {
    pub name: String,
}

/// Literal file contents plus contents pulled from Secrets / ConfigMaps
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FetchInline {
    /// File path -> file content
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub paths: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths_from: Vec<FetchInlineSource>,
}

/// A Secret or ConfigMap whose keys become files
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FetchInlineSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<FetchInlineSourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<FetchInlineSourceRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FetchInlineSourceRef {
    pub name: String,
    /// Directory the keys are written under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_path: Option<String>,
}

/// Version selection for untagged references
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct VersionSelection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semver: Option<VersionSelectionSemver>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct VersionSelectionSemver {
    /// Semver constraints, e.g. `>=1.0.0 <2.0.0`. Empty selects the highest version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FetchImgpkgBundle {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_selection: Option<VersionSelection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalObjectReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FetchImage {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_selection: Option<VersionSelection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FetchHttp {
    pub url: String,
    /// Expected sha256 of the downloaded payload (hex)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FetchGit {
    pub url: String,
    /// Branch, tag or commit; `origin/HEAD` when unset
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    #[serde(default)]
    pub lfs_skip_smudge: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FetchHelmChart {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<HelmChartRepository>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HelmChartRepository {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalObjectReference>,
}

/// Validated content source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchSource {
    Inline(FetchInline),
    ImgpkgBundle(FetchImgpkgBundle),
    Image(FetchImage),
    Http(FetchHttp),
    Git(FetchGit),
    HelmChart(FetchHelmChart),
}

impl FetchSource {
    /// Wire name of the variant, used in logs and status messages
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            FetchSource::Inline(_) => "inline",
            FetchSource::ImgpkgBundle(_) => "imgpkgBundle",
            FetchSource::Image(_) => "image",
            FetchSource::Http(_) => "http",
            FetchSource::Git(_) => "git",
            FetchSource::HelmChart(_) => "helmChart",
        }
    }

    /// Name of the Secret this source authenticates with, if any
    #[must_use]
    pub fn secret_ref(&self) -> Option<&str> {
        let reference = match self {
            FetchSource::Inline(_) => None,
            FetchSource::ImgpkgBundle(s) => s.secret_ref.as_ref(),
            FetchSource::Image(s) => s.secret_ref.as_ref(),
            FetchSource::Http(s) => s.secret_ref.as_ref(),
            FetchSource::Git(s) => s.secret_ref.as_ref(),
            FetchSource::HelmChart(s) => s.repository.as_ref().and_then(|r| r.secret_ref.as_ref()),
        };
        reference.map(|r| r.name.as_str())
    }
}

/// Rejected fetch entry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceConfigError {
    #[error("fetch entry must set exactly one source, found none")]
    NoSource,
    #[error("fetch entry must set exactly one source, found {}", .0.join(", "))]
    MultipleSources(Vec<&'static str>),
    #[error("invalid image reference '{0}'")]
    InvalidReference(String),
    #[error("'{0}' pins a tag or digest; tagSelection requires an untagged reference")]
    PinnedWithTagSelection(String),
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
}

impl TryFrom<&AppFetch> for FetchSource {
    type Error = SourceConfigError;

    fn try_from(fetch: &AppFetch) -> Result<Self, Self::Error> {
        let set: Vec<&'static str> = [
            ("inline", fetch.inline.is_some()),
            ("imgpkgBundle", fetch.imgpkg_bundle.is_some()),
            ("image", fetch.image.is_some()),
            ("http", fetch.http.is_some()),
            ("git", fetch.git.is_some()),
            ("helmChart", fetch.helm_chart.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect();

        if set.len() > 1 {
            return Err(SourceConfigError::MultipleSources(set));
        }

        if let Some(inline) = &fetch.inline {
            return Ok(FetchSource::Inline(inline.clone()));
        }
        if let Some(bundle) = &fetch.imgpkg_bundle {
            check_reference(&bundle.image, "imgpkgBundle.image", bundle.tag_selection.as_ref())?;
            return Ok(FetchSource::ImgpkgBundle(bundle.clone()));
        }
        if let Some(image) = &fetch.image {
            check_reference(&image.url, "image.url", image.tag_selection.as_ref())?;
            return Ok(FetchSource::Image(image.clone()));
        }
        if let Some(http) = &fetch.http {
            non_empty(&http.url, "http.url")?;
            return Ok(FetchSource::Http(http.clone()));
        }
        if let Some(git) = &fetch.git {
            non_empty(&git.url, "git.url")?;
            return Ok(FetchSource::Git(git.clone()));
        }
        if let Some(chart) = &fetch.helm_chart {
            non_empty(&chart.name, "helmChart.name")?;
            return Ok(FetchSource::HelmChart(chart.clone()));
        }

        Err(SourceConfigError::NoSource)
    }
}

fn non_empty(value: &str, field: &'static str) -> Result<(), SourceConfigError> {
    if value.trim().is_empty() {
        return Err(SourceConfigError::EmptyField { field });
    }
    Ok(())
}

fn check_reference(
    url: &str,
    field: &'static str,
    selection: Option<&VersionSelection>,
) -> Result<(), SourceConfigError> {
    non_empty(url, field)?;
    let reference = ImageReference::parse(url)
        .map_err(|_| SourceConfigError::InvalidReference(url.to_string()))?;
    if selection.is_some() && reference.is_pinned() {
        return Err(SourceConfigError::PinnedWithTagSelection(url.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn semver() -> Option<VersionSelection> {
        Some(VersionSelection {
            semver: Some(VersionSelectionSemver::default()),
        })
    }

    #[test]
    fn test_single_source_converts() {
        let fetch = AppFetch {
            image: Some(FetchImage {
                url: "registry.example.com/app:v1".to_string(),
                ..FetchImage::default()
            }),
            ..AppFetch::default()
        };
        let source = FetchSource::try_from(&fetch).unwrap();
        assert_eq!(source.kind(), "image");
    }

    #[test]
    fn test_no_source_is_rejected() {
        let fetch = AppFetch {
            path: Some("config".to_string()),
            ..AppFetch::default()
        };
        assert_eq!(
            FetchSource::try_from(&fetch),
            Err(SourceConfigError::NoSource)
        );
    }

    #[test]
    fn test_multiple_sources_are_rejected() {
        let fetch = AppFetch {
            http: Some(FetchHttp {
                url: "https://example.com/a.tgz".to_string(),
                ..FetchHttp::default()
            }),
            git: Some(FetchGit {
                url: "https://github.com/example/repo".to_string(),
                ..FetchGit::default()
            }),
            ..AppFetch::default()
        };
        assert_eq!(
            FetchSource::try_from(&fetch),
            Err(SourceConfigError::MultipleSources(vec!["http", "git"]))
        );
    }

    #[test]
    fn test_tag_selection_with_pinned_tag_is_rejected() {
        let fetch = AppFetch {
            imgpkg_bundle: Some(FetchImgpkgBundle {
                image: "registry.example.com/repo:1.0.0".to_string(),
                tag_selection: semver(),
                secret_ref: None,
            }),
            ..AppFetch::default()
        };
        assert!(matches!(
            FetchSource::try_from(&fetch),
            Err(SourceConfigError::PinnedWithTagSelection(_))
        ));
    }

    #[test]
    fn test_tag_selection_with_digest_is_rejected() {
        let fetch = AppFetch {
            image: Some(FetchImage {
                url: format!("registry.example.com/app@sha256:{}", "a".repeat(64)),
                tag_selection: semver(),
                ..FetchImage::default()
            }),
            ..AppFetch::default()
        };
        assert!(matches!(
            FetchSource::try_from(&fetch),
            Err(SourceConfigError::PinnedWithTagSelection(_))
        ));
    }

    #[test]
    fn test_tag_selection_on_untagged_reference_is_accepted() {
        let fetch = AppFetch {
            imgpkg_bundle: Some(FetchImgpkgBundle {
                image: "registry.example.com:5000/repo".to_string(),
                tag_selection: semver(),
                secret_ref: None,
            }),
            ..AppFetch::default()
        };
        assert!(FetchSource::try_from(&fetch).is_ok());
    }

    #[test]
    fn test_wire_shape_uses_camel_case_and_omits_unset() {
        let fetch = AppFetch {
            imgpkg_bundle: Some(FetchImgpkgBundle {
                image: "registry.example.com/repo".to_string(),
                tag_selection: semver(),
                secret_ref: None,
            }),
            ..AppFetch::default()
        };
        let json = serde_json::to_value(&fetch).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "imgpkgBundle": {
                    "image": "registry.example.com/repo",
                    "tagSelection": { "semver": {} }
                }
            })
        );
    }

    #[test]
    fn test_helm_chart_secret_ref_comes_from_repository() {
        let source = FetchSource::HelmChart(FetchHelmChart {
            name: "nginx".to_string(),
            version: Some("1.2.3".to_string()),
            repository: Some(HelmChartRepository {
                url: "https://charts.example.com".to_string(),
                secret_ref: Some(LocalObjectReference {
                    name: "chart-creds".to_string(),
                }),
            }),
        });
        assert_eq!(source.secret_ref(), Some("chart-creds"));
    }
}
