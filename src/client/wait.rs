//! # Waiting for Reconciliation
//!
//! Polls a resource until the controller has observed its latest generation
//! and reported an outcome. Conditions are only read once
//! `observedGeneration == generation`, otherwise they describe an older spec.

use crate::crd::{ConditionStatus, ConditionType, GenericStatus, Reconcilable, ReconcileStatus};
use async_trait::async_trait;
use kube::api::Api;
use kube::Resource;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("{kind} reconciliation failed: {useful_error_message}. {friendly_description}")]
    Failed {
        kind: &'static str,
        useful_error_message: String,
        friendly_description: String,
    },
    #[error("timed out after {}s waiting for {kind} to reconcile", timeout.as_secs())]
    Timeout {
        kind: &'static str,
        timeout: Duration,
    },
    #[error("failed to read {kind}: {source}")]
    Api {
        kind: &'static str,
        #[source]
        source: kube::Error,
    },
}

/// What a poll sees of the resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedStatus {
    pub generation: Option<i64>,
    pub status: Option<GenericStatus>,
}

/// Something that can be polled for its reconcile status
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Kind name used in messages
    fn kind(&self) -> &'static str;

    async fn observe(&self) -> Result<ObservedStatus, WaitError>;
}

/// Polls one named resource through the Kubernetes API
#[derive(Debug)]
pub struct KubeStatusSource<K: Reconcilable> {
    api: Api<K>,
    name: String,
}

impl<K: Reconcilable> KubeStatusSource<K> {
    #[must_use]
    pub fn new(api: Api<K>, name: impl Into<String>) -> Self {
        Self {
            api,
            name: name.into(),
        }
    }
}

#[async_trait]
impl<K: Reconcilable> StatusSource for KubeStatusSource<K> {
    fn kind(&self) -> &'static str {
        K::KIND_LABEL
    }

    async fn observe(&self) -> Result<ObservedStatus, WaitError> {
        let resource = self
            .api
            .get(&self.name)
            .await
            .map_err(|source| WaitError::Api {
                kind: K::KIND_LABEL,
                source,
            })?;
        Ok(ObservedStatus {
            generation: resource.meta().generation,
            status: resource.status().map(|s| s.generic().clone()),
        })
    }
}

/// Destination for progress lines
pub trait MessageSink: Send {
    fn line(&mut self, line: &str);
}

/// Prints progress lines to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl MessageSink for StdoutSink {
    fn line(&mut self, line: &str) {
        println!("{line}");
    }
}

/// Progress lines for one wait session, each printed at most once
///
/// Every poll re-reports the current conditions; without deduplication a
/// long reconcile would print the same line once per poll interval.
#[derive(Debug)]
pub struct DedupingMessages<S: MessageSink = StdoutSink> {
    sink: S,
    seen: HashSet<String>,
}

impl<S: MessageSink> DedupingMessages<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            seen: HashSet::new(),
        }
    }

    /// Emit `line` unless this session already emitted it
    pub fn notify(&mut self, line: impl Into<String>) {
        let line = line.into();
        if self.seen.insert(line.clone()) {
            self.sink.line(&line);
        }
    }

    /// Emit `line` unconditionally
    pub fn print(&mut self, line: &str) {
        self.sink.line(line);
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

impl Default for DedupingMessages<StdoutSink> {
    fn default() -> Self {
        Self::new(StdoutSink)
    }
}

/// Poll `source` every `interval` until it reports an outcome for its
/// current generation, or `timeout` elapses
///
/// # Errors
///
/// Returns [`WaitError::Failed`] carrying `usefulErrorMessage` and
/// `friendlyDescription` when `ReconcileFailed` is True, [`WaitError::Timeout`]
/// when no outcome arrives in time, and the source's error when a poll fails.
pub async fn wait_for_reconcile<S: MessageSink>(
    source: &dyn StatusSource,
    interval: Duration,
    timeout: Duration,
    notifier: &mut DedupingMessages<S>,
) -> Result<(), WaitError> {
    let kind = source.kind();
    let deadline = Instant::now() + timeout;

    loop {
        let observed = source.observe().await?;
        if evaluate(kind, &observed, notifier)? {
            return Ok(());
        }
        if Instant::now() + interval > deadline {
            return Err(WaitError::Timeout { kind, timeout });
        }
        tokio::time::sleep(interval).await;
    }
}

/// `Ok(true)` once succeeded, `Ok(false)` while still pending
fn evaluate<S: MessageSink>(
    kind: &'static str,
    observed: &ObservedStatus,
    notifier: &mut DedupingMessages<S>,
) -> Result<bool, WaitError> {
    let Some(status) = &observed.status else {
        return Ok(false);
    };
    if !status.is_current_for(observed.generation) {
        return Ok(false);
    }

    for condition in &status.conditions {
        notifier.notify(format!("{kind} reconcile status: {}", condition.r#type));
        if condition.status != ConditionStatus::True {
            continue;
        }
        match condition.r#type {
            ConditionType::ReconcileSucceeded => {
                notifier.print(&format!("{kind} successfully reconciled"));
                return Ok(true);
            }
            ConditionType::ReconcileFailed => {
                return Err(WaitError::Failed {
                    kind,
                    useful_error_message: status.useful_error_message.clone().unwrap_or_default(),
                    friendly_description: status.friendly_description.clone().unwrap_or_default(),
                });
            }
            _ => {}
        }
    }
    Ok(false)
}
