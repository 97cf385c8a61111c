//! # Content Source Resolver
//!
//! Materializes fetch sources into a directory.
//!
//! - `inline` - literal files and Secret / ConfigMap data written directly
//! - `http` - native streamed download, optional sha256 check, archive extraction
//! - `git`, `image`, `imgpkgBundle`, `helmChart` - delegated to `vendir sync`
//!
//! Every attempt resolves into its own scratch directory, so a failed or
//! canceled fetch never leaves partial content behind for the next attempt.

mod http;
mod inline;
pub mod secrets;
mod vendir;

pub use http::HttpFetcher;
pub use secrets::{KubeLookup, LookupError, ResourceLookup};

use crate::config::ToolPaths;
use crate::controller::error::{Classify, ErrorClass};
use crate::crd::{AppFetch, FetchSource, SourceConfigError};
use crate::exec::{CmdRunResult, CommandRunner};
use k8s_openapi::api::core::v1::Secret;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

/// Directory (relative to a work dir) that receives fetched content
pub const CONTENT_DIR: &str = "content";

/// Output of resolving one source
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    /// Directory holding the fetched files
    pub content_dir: PathBuf,
    /// vendir config document, for sources fetched through vendir
    pub directory_config: Option<String>,
    /// Re-stamped Secrets handed to the fetch tool
    pub aux_resources: Vec<Secret>,
    pub result: CmdRunResult,
}

/// Output of resolving every `spec.fetch` entry
#[derive(Debug, Clone)]
pub struct FetchedContent {
    /// Content root that template steps run against
    pub root: PathBuf,
    pub result: CmdRunResult,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    InvalidSource(#[from] SourceConfigError),
    #[error("path '{0}' escapes the content directory")]
    UnsafePath(String),
    #[error("subPath '{0}' does not exist in fetched content")]
    SubPathNotFound(String),
    #[error("secret {name} referenced by the fetch source was not found")]
    SecretNotFound { name: String },
    #[error("{kind} {name} referenced by inline.pathsFrom was not found")]
    InlineSourceNotFound { kind: &'static str, name: String },
    #[error(transparent)]
    Lookup(LookupError),
    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },
    #[error("download from {url} failed: {message}")]
    Download { url: String, message: String },
    #[error("checksum mismatch for {url}: expected sha256 {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },
    #[error("{tool} failed: {}", .result.error_summary())]
    ToolFailed {
        tool: &'static str,
        result: CmdRunResult,
    },
    #[error("fetch canceled")]
    Canceled,
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render vendir config: {0}")]
    Serialize(String),
}

impl FetchError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        FetchError::Io {
            context: context.into(),
            source,
        }
    }

    /// Raw output of the failing tool, if one ran
    #[must_use]
    pub fn result(&self) -> Option<&CmdRunResult> {
        match self {
            FetchError::ToolFailed { result, .. } => Some(result),
            _ => None,
        }
    }
}

impl Classify for FetchError {
    fn class(&self) -> ErrorClass {
        match self {
            FetchError::InvalidSource(_)
            | FetchError::UnsafePath(_)
            | FetchError::SubPathNotFound(_)
            | FetchError::ChecksumMismatch { .. } => ErrorClass::Config,
            FetchError::SecretNotFound { .. }
            | FetchError::InlineSourceNotFound { .. }
            | FetchError::Lookup(_)
            | FetchError::HttpStatus { .. }
            | FetchError::Download { .. }
            | FetchError::Canceled
            | FetchError::Io { .. } => ErrorClass::Transient,
            FetchError::ToolFailed { .. } => ErrorClass::ExternalTool { retryable: true },
            FetchError::Serialize(_) => ErrorClass::ExternalTool { retryable: false },
        }
    }
}

/// Join `relative` onto `base`, rejecting absolute paths and `..`
pub fn safe_join(base: &Path, relative: &str) -> Result<PathBuf, FetchError> {
    let rel = Path::new(relative);
    let mut joined = base.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(FetchError::UnsafePath(relative.to_string()));
            }
        }
    }
    Ok(joined)
}

/// Resolves fetch sources into directories
pub struct Resolver {
    lookup: Arc<dyn ResourceLookup>,
    runner: Arc<dyn CommandRunner>,
    http: HttpFetcher,
    tools: ToolPaths,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    pub fn new(
        lookup: Arc<dyn ResourceLookup>,
        runner: Arc<dyn CommandRunner>,
        http: HttpFetcher,
        tools: ToolPaths,
    ) -> Self {
        Self {
            lookup,
            runner,
            http,
            tools,
        }
    }

    /// Resolve one source into `work_dir/content`
    pub async fn resolve(
        &self,
        source: &FetchSource,
        work_dir: &Path,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<ResolvedSource, FetchError> {
        let content_dir = work_dir.join(CONTENT_DIR);
        tokio::fs::create_dir_all(&content_dir)
            .await
            .map_err(|e| FetchError::io("failed to create content directory", e))?;

        let secret = match source.secret_ref() {
            Some(name) => Some(self.lookup_secret(namespace, name).await?),
            None => None,
        };

        if cancel.is_cancelled() {
            return Err(FetchError::Canceled);
        }

        match source {
            FetchSource::Inline(inline) => {
                let result =
                    inline::write_inline(inline, &content_dir, namespace, self.lookup.as_ref())
                        .await?;
                Ok(ResolvedSource {
                    content_dir,
                    directory_config: None,
                    aux_resources: Vec::new(),
                    result,
                })
            }
            FetchSource::Http(http) => {
                let result = self
                    .http
                    .fetch(http, secret.as_ref(), work_dir, &content_dir, cancel)
                    .await?;
                Ok(ResolvedSource {
                    content_dir,
                    directory_config: None,
                    aux_resources: Vec::new(),
                    result,
                })
            }
            FetchSource::Git(_)
            | FetchSource::Image(_)
            | FetchSource::ImgpkgBundle(_)
            | FetchSource::HelmChart(_) => {
                let aux_resources: Vec<Secret> =
                    secret.iter().map(secrets::restamp_secret).collect();
                let directory_config = vendir::directory_config(source)?;
                let stream = vendir::config_stream(&directory_config, &aux_resources)?;
                let result = vendir::sync(
                    self.runner.as_ref(),
                    &self.tools.vendir,
                    &stream,
                    work_dir,
                    cancel,
                )
                .await?;
                Ok(ResolvedSource {
                    content_dir,
                    directory_config: Some(directory_config),
                    aux_resources,
                    result,
                })
            }
        }
    }

    /// Resolve every `spec.fetch` entry into `work_dir/root`
    ///
    /// A single entry lands at the root; several entries land in `0/`, `1/`,
    /// ... unless they set `path`.
    pub async fn resolve_all(
        &self,
        entries: &[AppFetch],
        work_dir: &Path,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedContent, FetchError> {
        let root = work_dir.join("root");
        let mut results = Vec::with_capacity(entries.len());

        for (index, entry) in entries.iter().enumerate() {
            let source = FetchSource::try_from(entry)?;
            let span = info_span!("fetch.source", fetch.index = index, fetch.kind = source.kind());
            let staging = work_dir.join(format!("fetch-{index}"));

            let resolved = self
                .resolve(&source, &staging, namespace, cancel)
                .instrument(span)
                .await?;

            let content = match sub_path(&source) {
                Some(sub) => {
                    let dir = safe_join(&resolved.content_dir, sub)?;
                    if !dir.is_dir() {
                        return Err(FetchError::SubPathNotFound(sub.to_string()));
                    }
                    dir
                }
                None => resolved.content_dir.clone(),
            };

            let destination = match (&entry.path, entries.len()) {
                (Some(path), _) => safe_join(&root, path)?,
                (None, 1) => root.clone(),
                (None, _) => root.join(index.to_string()),
            };
            move_dir(&content, &destination)?;
            debug!(
                fetch.index = index,
                destination = %destination.display(),
                "fetched content placed"
            );

            results.push(resolved.result);
        }

        std::fs::create_dir_all(&root)
            .map_err(|e| FetchError::io("failed to create content root", e))?;
        info!(sources = entries.len(), "fetch completed");

        let mut results = results.into_iter();
        let mut result = results
            .next()
            .unwrap_or_else(|| CmdRunResult::success(""));
        for next in results {
            result.merge_stdout(&next);
        }
        Ok(FetchedContent { root, result })
    }

    async fn lookup_secret(&self, namespace: &str, name: &str) -> Result<Secret, FetchError> {
        self.lookup
            .get_secret(namespace, name)
            .await
            .map_err(|e| match e {
                LookupError::NotFound { name, .. } => FetchError::SecretNotFound { name },
                other => FetchError::Lookup(other),
            })
    }
}

fn sub_path(source: &FetchSource) -> Option<&str> {
    match source {
        FetchSource::Image(s) => s.sub_path.as_deref(),
        FetchSource::Http(s) => s.sub_path.as_deref(),
        FetchSource::Git(s) => s.sub_path.as_deref(),
        FetchSource::Inline(_) | FetchSource::ImgpkgBundle(_) | FetchSource::HelmChart(_) => None,
    }
}

/// Move the contents of `from` into `to`, merging into an existing directory
fn move_dir(from: &Path, to: &Path) -> Result<(), FetchError> {
    if !to.exists() {
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FetchError::io(format!("failed to create {}", parent.display()), e))?;
        }
        return std::fs::rename(from, to).map_err(|e| {
            FetchError::io(
                format!("failed to move {} to {}", from.display(), to.display()),
                e,
            )
        });
    }

    for entry in walkdir::WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|e| {
            FetchError::io(
                format!("failed to walk {}", from.display()),
                std::io::Error::other(e.to_string()),
            )
        })?;
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .map_err(|e| FetchError::io(format!("failed to create {}", target.display()), e))?;
        } else {
            std::fs::rename(entry.path(), &target)
                .map_err(|e| FetchError::io(format!("failed to move {}", target.display()), e))?;
        }
    }
    Ok(())
}
