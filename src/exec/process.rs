//! Command runner backed by `tokio::process`.

use super::{CmdRunResult, CommandRunner, CommandSpec};
use async_trait::async_trait;
use chrono::Utc;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Spawns real processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: Option<&CancellationToken>,
        progress: Option<&UnboundedSender<String>>,
    ) -> CmdRunResult {
        let mut result = CmdRunResult::started(Utc::now());
        debug!(command = %spec, "running command");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Kill child on drop so a dropped attempt never leaves orphans
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                result.exit_code = -1;
                result.error = Some(format!("failed to spawn {}: {e}", spec.program));
                result.finish();
                return result;
            }
        };

        // Writing stdin on its own task keeps a tool that streams output
        // before consuming all of its input from deadlocking on a full pipe
        let stdin_task = match (child.stdin.take(), spec.stdin.clone()) {
            (Some(mut stdin), Some(input)) => Some(tokio::spawn(async move {
                let written = stdin.write_all(&input).await;
                let closed = stdin.shutdown().await;
                written.and(closed)
            })),
            _ => None,
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            result.exit_code = -1;
            result.error = Some(format!("failed to capture output of {}", spec.program));
            result.finish();
            return result;
        };

        let read_stdout = async {
            let mut reader = BufReader::new(stdout);
            let mut collected = String::new();
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line);
                        collected.push_str(&text);
                        if let Some(tx) = progress {
                            // Receiver gone only means nobody watches progress
                            let _ = tx.send(text.trim_end_matches('\n').to_string());
                        }
                    }
                    Err(e) => {
                        warn!(command = %spec.program, error = %e, "stdout read failed");
                        break;
                    }
                }
            }
            collected
        };
        let read_stderr = async {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            if let Err(e) = reader.read_to_end(&mut buf).await {
                warn!(command = %spec.program, error = %e, "stderr read failed");
            }
            String::from_utf8_lossy(&buf).into_owned()
        };

        let outcome = {
            let io = async { tokio::join!(read_stdout, read_stderr, child.wait()) };
            tokio::select! {
                out = io => Some(out),
                () = cancelled(cancel) => None,
            }
        };

        match outcome {
            Some((stdout, stderr, status)) => {
                result.stdout = stdout;
                result.stderr = stderr;
                match status {
                    Ok(status) => {
                        result.exit_code = status.code().unwrap_or(-1);
                        if !status.success() && status.code().is_none() {
                            result.error = Some(format!("{} terminated by signal", spec.program));
                        }
                    }
                    Err(e) => {
                        result.exit_code = -1;
                        result.error = Some(format!("failed to wait for {}: {e}", spec.program));
                    }
                }
            }
            None => {
                if let Err(e) = child.kill().await {
                    warn!(command = %spec.program, error = %e, "failed to kill canceled command");
                }
                result.exit_code = -1;
                result.error = Some(format!("{} canceled", spec.program));
            }
        }

        if let Some(task) = stdin_task {
            match task.await {
                Ok(Ok(())) => {}
                // A tool exiting before reading all input shows up as a broken
                // pipe; its exit status already tells the story
                Ok(Err(e)) => debug!(command = %spec.program, error = %e, "stdin write incomplete"),
                Err(e) => debug!(command = %spec.program, error = %e, "stdin task aborted"),
            }
        }

        result.finish();
        result
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending::<()>().await,
    }
}
