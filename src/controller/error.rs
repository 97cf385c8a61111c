//! # Error Classification
//!
//! Stage errors are classified so the engine can pick a requeue strategy
//! without knowing the stage's internals.

use crate::exec::CmdRunResult;
use std::fmt;

/// How a failed attempt is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Invalid spec; only a spec change can fix it
    Config,
    /// Network, API or missing-dependency failure; retried with backoff
    Transient,
    /// An external tool failed
    ExternalTool { retryable: bool },
    /// The spec changed underneath the attempt; requeue at once
    Conflict,
}

impl ErrorClass {
    /// Whether the failure is retried on the backoff schedule
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ErrorClass::Transient | ErrorClass::Conflict => true,
            ErrorClass::ExternalTool { retryable } => *retryable,
            ErrorClass::Config => false,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Config => "config",
            ErrorClass::Transient => "transient",
            ErrorClass::ExternalTool { retryable: true } => "external_tool_retryable",
            ErrorClass::ExternalTool { retryable: false } => "external_tool",
            ErrorClass::Conflict => "conflict",
        }
    }
}

/// Implemented by every stage error
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

/// Reconciliation stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Validate,
    Fetch,
    Template,
    Deploy,
    Inspect,
    Unpack,
    Register,
    Delete,
}

impl Stage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Fetch => "fetch",
            Stage::Template => "template",
            Stage::Deploy => "deploy",
            Stage::Inspect => "inspect",
            Stage::Unpack => "unpack",
            Stage::Register => "register",
            Stage::Delete => "delete",
        }
    }

    /// Condition reason used when this stage fails
    #[must_use]
    pub fn failure_reason(&self) -> &'static str {
        match self {
            Stage::Validate => "InvalidSpec",
            Stage::Fetch => "FetchFailed",
            Stage::Template => "TemplateFailed",
            Stage::Deploy => "DeployFailed",
            Stage::Inspect => "InspectFailed",
            Stage::Unpack => "UnpackFailed",
            Stage::Register => "RegisterFailed",
            Stage::Delete => "DeleteFailed",
        }
    }

    /// Title used in `friendlyDescription`
    #[must_use]
    pub fn title(&self) -> &'static str {
        match self {
            Stage::Validate => "Validating",
            Stage::Fetch => "Fetching",
            Stage::Template => "Templating",
            Stage::Deploy => "Deploying",
            Stage::Inspect => "Inspecting",
            Stage::Unpack => "Unpacking",
            Stage::Register => "Registering",
            Stage::Delete => "Deleting",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage error as seen by the engine
#[derive(Debug, Clone)]
pub struct StageFailure {
    pub stage: Stage,
    pub class: ErrorClass,
    pub message: String,
    /// Raw output of the failing invocation, if one ran
    pub result: Option<CmdRunResult>,
}

impl StageFailure {
    pub fn new<E>(stage: Stage, error: &E, result: Option<CmdRunResult>) -> Self
    where
        E: Classify + fmt::Display,
    {
        Self {
            stage,
            class: error.class(),
            message: error.to_string(),
            result,
        }
    }

    /// Failure raised by the engine when the spec moved mid-attempt
    #[must_use]
    pub fn conflict(stage: Stage, observed: Option<i64>, current: Option<i64>) -> Self {
        Self {
            stage,
            class: ErrorClass::Conflict,
            message: format!(
                "generation changed from {} to {} during {stage}",
                observed.unwrap_or_default(),
                current.unwrap_or_default()
            ),
            result: None,
        }
    }

    /// `friendlyDescription` for this failure
    #[must_use]
    pub fn friendly_description(&self) -> String {
        format!("{} failed: {}", self.stage.title(), self.message)
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.message)
    }
}

impl std::error::Error for StageFailure {}
