//! # Status and Conditions
//!
//! Status types shared by `App` and `PackageRepository`, and by the pollers
//! (`appctl ... --wait`) that read them.
//!
//! The controller always writes a complete replacement status. Readers must
//! check [`GenericStatus::is_current_for`] before interpreting conditions: a
//! status whose `observedGeneration` lags `metadata.generation` describes an
//! older spec.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition types written by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ConditionType {
    Reconciling,
    ReconcileSucceeded,
    ReconcileFailed,
    Deleting,
    DeleteFailed,
}

impl ConditionType {
    /// The mutually exclusive reconcile outcome conditions
    pub const RECONCILE_TRIO: [ConditionType; 3] = [
        ConditionType::Reconciling,
        ConditionType::ReconcileSucceeded,
        ConditionType::ReconcileFailed,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Reconciling => "Reconciling",
            ConditionType::ReconcileSucceeded => "ReconcileSucceeded",
            ConditionType::ReconcileFailed => "ReconcileFailed",
            ConditionType::Deleting => "Deleting",
            ConditionType::DeleteFailed => "DeleteFailed",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a condition (True, False, Unknown)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: ConditionType,
    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,
    /// Machine readable reason (e.g. `FetchFailed`, `Paused`)
    #[serde(default)]
    pub reason: Option<String>,
    /// Human readable message
    #[serde(default)]
    pub message: Option<String>,
    /// Last time the status of this condition flipped (RFC3339)
    #[serde(default)]
    pub last_transition_time: Option<String>,
}

/// Snapshot of one tool invocation kept on the status for debugging
///
/// Output is truncated to the configured limit; the primary condition message
/// never repeats it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StageStatus {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
}

/// Condition bookkeeping common to every resource kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenericStatus {
    /// Generation of the spec the last completed attempt ran against
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Short human description of the current state, naming the failing stage
    #[serde(default)]
    pub friendly_description: Option<String>,
    /// Error of the last failed attempt, cleared on success
    #[serde(default)]
    pub useful_error_message: Option<String>,
}

impl GenericStatus {
    #[must_use]
    pub fn condition(&self, ty: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == ty)
    }

    #[must_use]
    pub fn is_true(&self, ty: ConditionType) -> bool {
        self.condition(ty)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Whether this status describes the spec at `generation`
    #[must_use]
    pub fn is_current_for(&self, generation: Option<i64>) -> bool {
        generation.is_some() && self.observed_generation == generation
    }

    /// Upsert a single condition, preserving `lastTransitionTime` when the
    /// status value does not change.
    pub fn set_condition(
        &mut self,
        ty: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) {
        let reason = Some(reason.to_string());
        let message = message.map(str::to_string);
        match self.conditions.iter_mut().find(|c| c.r#type == ty) {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = Some(now.to_rfc3339());
                }
                existing.status = status;
                existing.reason = reason;
                existing.message = message;
            }
            None => self.conditions.push(Condition {
                r#type: ty,
                status,
                reason,
                message,
                last_transition_time: Some(now.to_rfc3339()),
            }),
        }
    }

    /// Make `ty` the single True condition of the reconcile trio
    ///
    /// All three conditions are written in the same call so the status never
    /// shows two of them True.
    pub fn set_reconcile_state(
        &mut self,
        ty: ConditionType,
        reason: &str,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) {
        debug_assert!(ConditionType::RECONCILE_TRIO.contains(&ty));
        for other in ConditionType::RECONCILE_TRIO {
            if other == ty {
                self.set_condition(other, ConditionStatus::True, reason, message, now);
            } else {
                self.set_condition(other, ConditionStatus::False, reason, None, now);
            }
        }
    }

    /// Drop a condition entirely
    pub fn remove_condition(&mut self, ty: ConditionType) {
        self.conditions.retain(|c| c.r#type != ty);
    }

    /// Number of reconcile trio conditions currently True
    #[must_use]
    pub fn reconcile_true_count(&self) -> usize {
        ConditionType::RECONCILE_TRIO
            .iter()
            .filter(|ty| self.is_true(**ty))
            .count()
    }
}

/// Attempt bookkeeping used to schedule the next attempt
///
/// Persisted on the status so backoff and sync schedules survive controller
/// restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttemptStatus {
    /// Start of the last completed attempt (RFC3339)
    #[serde(default)]
    pub last_attempted_at: Option<String>,
    /// Start of the last successful attempt (RFC3339)
    #[serde(default)]
    pub last_succeeded_at: Option<String>,
    #[serde(default)]
    pub consecutive_reconcile_failures: u32,
    #[serde(default)]
    pub consecutive_reconcile_successes: u32,
    /// Whether the last failure is retried on a backoff schedule
    #[serde(default)]
    pub last_failure_retryable: Option<bool>,
    /// Last value of the reconcile trigger annotation that was acted on
    #[serde(default)]
    pub last_handled_trigger: Option<String>,
}

impl AttemptStatus {
    /// Parsed `lastAttemptedAt`; unparseable values count as never attempted
    #[must_use]
    pub fn last_attempted(&self) -> Option<DateTime<Utc>> {
        self.last_attempted_at
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn record_success(&mut self, started: DateTime<Utc>) {
        self.last_attempted_at = Some(started.to_rfc3339());
        self.last_succeeded_at = Some(started.to_rfc3339());
        self.consecutive_reconcile_failures = 0;
        self.consecutive_reconcile_successes = self.consecutive_reconcile_successes.saturating_add(1);
        self.last_failure_retryable = None;
    }

    pub fn record_failure(&mut self, started: DateTime<Utc>, retryable: bool) {
        self.last_attempted_at = Some(started.to_rfc3339());
        self.consecutive_reconcile_successes = 0;
        self.consecutive_reconcile_failures = self.consecutive_reconcile_failures.saturating_add(1);
        self.last_failure_retryable = Some(retryable);
    }
}

/// Access to the status sections every reconciled kind carries
pub trait ReconcileStatus: Clone + Default + Serialize + Send + Sync + 'static {
    fn generic(&self) -> &GenericStatus;
    fn generic_mut(&mut self) -> &mut GenericStatus;
    fn attempt(&self) -> &AttemptStatus;
    fn attempt_mut(&mut self) -> &mut AttemptStatus;
}
