//! # External Command Execution
//!
//! Every fetch, template and deploy sub-invocation goes through a
//! [`CommandRunner`] and reports a uniform [`CmdRunResult`].
//!
//! The runner never fails: spawn errors, non-zero exits and cancellation are all
//! recorded on the result so the caller can attach it to status as-is.

mod process;

pub use process::ProcessRunner;

use crate::crd::StageStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Uniform result of an external invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdRunResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Set when the invocation did not run to a clean exit (spawn failure,
    /// cancellation, download error, non-zero exit summary)
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CmdRunResult {
    /// Empty in-progress result
    #[must_use]
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
            error: None,
            started_at: at,
            finished_at: None,
        }
    }

    /// Finished result carrying only an error
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            exit_code: -1,
            error: Some(error.into()),
            finished_at: Some(now),
            ..Self::started(now)
        }
    }

    /// Successful result with the given stdout
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            stdout: stdout.into(),
            finished_at: Some(now),
            ..Self::started(now)
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.exit_code == 0
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Append another invocation's output, keeping the first failure
    pub fn merge_stdout(&mut self, other: &CmdRunResult) {
        append_line_block(&mut self.stdout, &other.stdout);
        append_line_block(&mut self.stderr, &other.stderr);
        if self.is_success() && !other.is_success() {
            self.exit_code = other.exit_code;
            self.error.clone_from(&other.error);
        }
        if other.finished_at > self.finished_at {
            self.finished_at = other.finished_at;
        }
    }

    /// One-line description of why the invocation failed
    #[must_use]
    pub fn error_summary(&self) -> String {
        if let Some(error) = &self.error {
            return error.clone();
        }
        let detail = self
            .stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_default()
            .trim();
        if detail.is_empty() {
            format!("exit status {}", self.exit_code)
        } else {
            format!("exit status {}: {detail}", self.exit_code)
        }
    }

    /// Status snapshot with each stream truncated to its last `limit` bytes
    #[must_use]
    pub fn to_stage_status(&self, limit: usize) -> StageStatus {
        StageStatus {
            stdout: tail(&self.stdout, limit),
            stderr: tail(&self.stderr, limit),
            exit_code: self.exit_code,
            error: self.error.clone(),
            started_at: Some(self.started_at.to_rfc3339()),
            finished_at: self.finished_at.map(|t| t.to_rfc3339()),
        }
    }
}

fn append_line_block(into: &mut String, block: &str) {
    if block.is_empty() {
        return;
    }
    if !into.is_empty() && !into.ends_with('\n') {
        into.push('\n');
    }
    into.push_str(block);
}

/// Last `limit` bytes of `s`, cut at a char boundary
fn tail(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    let mut start = s.len() - limit;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

/// An external command to run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Runs external commands
///
/// `cancel` kills the process when it fires. `progress` receives stdout one
/// line at a time while the process runs.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: Option<&CancellationToken>,
        progress: Option<&UnboundedSender<String>>,
    ) -> CmdRunResult;
}
