//! # Template Pipeline
//!
//! Renders fetched content into one manifest stream by running the declared
//! steps in order. Each step's stdout becomes the next step's input. With no
//! steps the YAML / JSON files of the content root are passed through as-is.

mod steps;

use crate::config::ToolPaths;
use crate::controller::error::{Classify, ErrorClass};
use crate::crd::{AppTemplate, StepConfigError, TemplateStep};
use crate::exec::{CmdRunResult, CommandRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Values steps fall back to when they do not set their own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateContext {
    pub app_name: String,
    pub namespace: String,
}

/// Input of one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepInput {
    Directory(PathBuf),
    Stream(String),
}

/// Pipeline output
#[derive(Debug, Clone)]
pub struct Rendered {
    pub manifest: String,
    /// One result per step run (a single synthetic result for passthrough)
    pub results: Vec<CmdRunResult>,
}

impl Rendered {
    /// All step results folded into one for status
    #[must_use]
    pub fn combined_result(&self) -> CmdRunResult {
        let mut iter = self.results.iter();
        let mut combined = iter
            .next()
            .cloned()
            .unwrap_or_else(|| CmdRunResult::success(""));
        for next in iter {
            combined.merge_stdout(next);
        }
        combined
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error(transparent)]
    InvalidStep(#[from] StepConfigError),
    #[error("path '{0}' escapes the content directory")]
    UnsafePath(String),
    #[error("{step} (template[{index}]) failed: {}", .result.error_summary())]
    StepFailed {
        index: usize,
        step: &'static str,
        retryable: bool,
        result: CmdRunResult,
    },
    #[error("templating canceled")]
    Canceled,
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl TemplateError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TemplateError::Io {
            context: context.into(),
            source,
        }
    }

    #[must_use]
    pub fn result(&self) -> Option<&CmdRunResult> {
        match self {
            TemplateError::StepFailed { result, .. } => Some(result),
            _ => None,
        }
    }
}

impl Classify for TemplateError {
    fn class(&self) -> ErrorClass {
        match self {
            TemplateError::InvalidStep(_) | TemplateError::UnsafePath(_) => ErrorClass::Config,
            TemplateError::StepFailed { retryable, .. } => ErrorClass::ExternalTool {
                retryable: *retryable,
            },
            TemplateError::Canceled | TemplateError::Io { .. } => ErrorClass::Transient,
        }
    }
}

/// Convert `spec.template` into validated steps
pub fn parse_steps(templates: &[AppTemplate]) -> Result<Vec<TemplateStep>, StepConfigError> {
    templates
        .iter()
        .enumerate()
        .map(|(index, template)| template.to_step(index))
        .collect()
}

/// Runs template steps
pub struct TemplatePipeline {
    runner: Arc<dyn CommandRunner>,
    tools: ToolPaths,
}

impl std::fmt::Debug for TemplatePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplatePipeline")
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

impl TemplatePipeline {
    pub fn new(runner: Arc<dyn CommandRunner>, tools: ToolPaths) -> Self {
        Self { runner, tools }
    }

    /// Render `content_dir` through `steps`
    ///
    /// `scratch_dir` receives intermediate streams for directory-consuming
    /// steps; it must be exclusive to the attempt.
    pub async fn render(
        &self,
        content_dir: &Path,
        scratch_dir: &Path,
        steps: &[TemplateStep],
        ctx: &TemplateContext,
        cancel: &CancellationToken,
    ) -> Result<Rendered, TemplateError> {
        if steps.is_empty() {
            let manifest = passthrough(content_dir)?;
            debug!(bytes = manifest.len(), "no template steps, passing content through");
            return Ok(Rendered {
                manifest: manifest.clone(),
                results: vec![CmdRunResult::success(manifest)],
            });
        }

        let mut input = StepInput::Directory(content_dir.to_path_buf());
        let mut results = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(TemplateError::Canceled);
            }
            let span = info_span!("template.step", step = step.name(), template.index = index);

            let dir = match &input {
                StepInput::Directory(dir) => dir.clone(),
                StepInput::Stream(stream) => {
                    materialize_stream(stream, &scratch_dir.join(format!("template-{index}")), step)?
                }
            };
            let cmd = steps::command(step, &input, &dir, content_dir, ctx, &self.tools)?;

            let result = self
                .runner
                .run(&cmd, Some(cancel), None)
                .instrument(span)
                .await;
            if cancel.is_cancelled() {
                return Err(TemplateError::Canceled);
            }
            if !result.is_success() {
                let retryable = steps::is_retryable(step, &result.stderr);
                warn!(
                    step = step.name(),
                    template.index = index,
                    retryable,
                    "template step failed: {}",
                    result.error_summary()
                );
                return Err(TemplateError::StepFailed {
                    index,
                    step: step.name(),
                    retryable,
                    result,
                });
            }

            info!(step = step.name(), bytes = result.stdout.len(), "template step finished");
            input = StepInput::Stream(result.stdout.clone());
            results.push(result);
        }

        let manifest = match input {
            StepInput::Stream(stream) => stream,
            StepInput::Directory(_) => String::new(),
        };
        Ok(Rendered { manifest, results })
    }
}

/// Write a stream where a directory-consuming step can read it
fn materialize_stream(
    stream: &str,
    dir: &Path,
    step: &TemplateStep,
) -> Result<PathBuf, TemplateError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| TemplateError::io(format!("failed to create {}", dir.display()), e))?;
    std::fs::write(dir.join("stream.yml"), stream)
        .map_err(|e| TemplateError::io("failed to write intermediate stream", e))?;
    if matches!(step, TemplateStep::Kustomize(_)) {
        std::fs::write(
            dir.join("kustomization.yaml"),
            "apiVersion: kustomize.config.k8s.io/v1beta1\nkind: Kustomization\nresources:\n- stream.yml\n",
        )
        .map_err(|e| TemplateError::io("failed to write kustomization", e))?;
    }
    Ok(dir.to_path_buf())
}

/// YAML / JSON files under `dir`, sorted by path, joined with `---`
fn passthrough(dir: &Path) -> Result<String, TemplateError> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e, "yaml" | "yml" | "json"))
        })
        .collect();
    files.sort();

    let mut manifest = String::new();
    for file in files {
        let content = std::fs::read_to_string(&file)
            .map_err(|e| TemplateError::io(format!("failed to read {}", file.display()), e))?;
        if !manifest.is_empty() {
            if !manifest.ends_with('\n') {
                manifest.push('\n');
            }
            manifest.push_str("---\n");
        }
        manifest.push_str(&content);
    }
    Ok(manifest)
}
