//! # vendir
//!
//! Sources that need a registry or VCS client are fetched by `vendir sync`.
//! The controller renders a vendir `Config` document for the single source,
//! appends re-stamped Secrets the config refers to, and pipes the stream to
//! vendir on stdin.

use super::secrets::secret_document;
use super::{FetchError, CONTENT_DIR};
use crate::crd::{FetchSource, VersionSelection};
use crate::exec::{CmdRunResult, CommandRunner, CommandSpec};
use k8s_openapi::api::core::v1::Secret;
use serde::Serialize;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::info;

const LOCK_FILE: &str = "vendir.lock.yml";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VendirConfig {
    api_version: &'static str,
    kind: &'static str,
    directories: Vec<Directory>,
}

#[derive(Debug, Serialize)]
struct Directory {
    path: String,
    contents: Vec<DirectoryContents>,
}

#[derive(Debug, Serialize)]
struct DirectoryContents {
    path: String,
    #[serde(flatten)]
    source: ContentsSource,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum ContentsSource {
    Git(GitContents),
    Image(ImageContents),
    ImgpkgBundle(ImgpkgBundleContents),
    HelmChart(HelmChartContents),
}

#[derive(Debug, Serialize)]
struct SecretRef {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GitContents {
    url: String,
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_ref: Option<SecretRef>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    lfs_skip_smudge: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageContents {
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag_selection: Option<VersionSelection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_ref: Option<SecretRef>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImgpkgBundleContents {
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag_selection: Option<VersionSelection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_ref: Option<SecretRef>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HelmChartContents {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repository: Option<HelmChartRepositoryContents>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HelmChartRepositoryContents {
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_ref: Option<SecretRef>,
}

fn secret_ref(name: Option<&str>) -> Option<SecretRef> {
    name.map(|name| SecretRef {
        name: name.to_string(),
    })
}

/// Render the vendir `Config` document for `source`
pub(super) fn directory_config(source: &FetchSource) -> Result<String, FetchError> {
    let secret = source.secret_ref();
    let contents = match source {
        FetchSource::Git(git) => ContentsSource::Git(GitContents {
            url: git.url.clone(),
            git_ref: git
                .git_ref
                .clone()
                .unwrap_or_else(|| "origin/HEAD".to_string()),
            secret_ref: secret_ref(secret),
            lfs_skip_smudge: git.lfs_skip_smudge,
        }),
        FetchSource::Image(image) => ContentsSource::Image(ImageContents {
            url: image.url.clone(),
            tag_selection: image.tag_selection.clone(),
            secret_ref: secret_ref(secret),
        }),
        FetchSource::ImgpkgBundle(bundle) => ContentsSource::ImgpkgBundle(ImgpkgBundleContents {
            image: bundle.image.clone(),
            tag_selection: bundle.tag_selection.clone(),
            secret_ref: secret_ref(secret),
        }),
        FetchSource::HelmChart(chart) => ContentsSource::HelmChart(HelmChartContents {
            name: chart.name.clone(),
            version: chart.version.clone(),
            repository: chart
                .repository
                .as_ref()
                .map(|repo| HelmChartRepositoryContents {
                    url: repo.url.clone(),
                    secret_ref: secret_ref(secret),
                }),
        }),
        FetchSource::Inline(_) | FetchSource::Http(_) => {
            return Err(FetchError::Serialize(format!(
                "{} sources are not fetched with vendir",
                source.kind()
            )));
        }
    };

    let config = VendirConfig {
        api_version: "vendir.k14s.io/v1alpha1",
        kind: "Config",
        directories: vec![Directory {
            path: CONTENT_DIR.to_string(),
            contents: vec![DirectoryContents {
                path: ".".to_string(),
                source: contents,
            }],
        }],
    };
    serde_yaml::to_string(&config).map_err(|e| FetchError::Serialize(e.to_string()))
}

/// Config document followed by the auxiliary Secrets, as one YAML stream
pub(super) fn config_stream(config: &str, secrets: &[Secret]) -> Result<String, FetchError> {
    let mut stream = config.to_string();
    for secret in secrets {
        let doc = secret_document(secret).map_err(|e| FetchError::Serialize(e.to_string()))?;
        if !stream.ends_with('\n') {
            stream.push('\n');
        }
        stream.push_str("---\n");
        stream.push_str(&doc);
    }
    Ok(stream)
}

/// Run `vendir sync` in `work_dir`
pub(super) async fn sync(
    runner: &dyn CommandRunner,
    vendir: &str,
    stream: &str,
    work_dir: &Path,
    cancel: &CancellationToken,
) -> Result<CmdRunResult, FetchError> {
    info!("Running vendir sync in {}", work_dir.display());
    let spec = CommandSpec::new(vendir)
        .args(["sync", "-f", "-", "--lock-file"])
        .arg(work_dir.join(LOCK_FILE).display().to_string())
        .stdin(stream.as_bytes())
        .current_dir(work_dir);
    let result = runner.run(&spec, Some(cancel), None).await;
    if cancel.is_cancelled() {
        return Err(FetchError::Canceled);
    }
    if !result.is_success() {
        return Err(FetchError::ToolFailed {
            tool: "vendir",
            result,
        });
    }
    Ok(result)
}
