//! # Validation
//!
//! Spec checks run before any stage. Failures are configuration errors: only
//! a spec edit can fix them.

use crate::controller::error::{Classify, ErrorClass};
use crate::controller::template::parse_steps;
use crate::crd::{AppSpec, FetchSource, SourceConfigError, StepConfigError};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static DURATION_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<number>\d+)(?P<unit>ms|s|m|h|d)")
        .expect("Failed to compile duration segment regex")
});

static DURATION_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(ms|s|m|h|d))+$").expect("Failed to compile duration format regex")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationError {
    #[error("duration string cannot be empty")]
    Empty,
    #[error("invalid duration format '{0}', expected <number><unit> (e.g. '30s', '5m', '1h30m')")]
    Format(String),
    #[error("duration '{0}' must be greater than 0")]
    Zero(String),
    #[error("duration '{0}' is too large")]
    Overflow(String),
}

/// Parse a Kubernetes style duration (`30s`, `5m`, `1h`, `1d`, `1h30m`)
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Duration, DurationError> {
    let trimmed = duration_str.trim();
    if trimmed.is_empty() {
        return Err(DurationError::Empty);
    }

    let lower = trimmed.to_lowercase();
    if !DURATION_FORMAT.is_match(&lower) {
        return Err(DurationError::Format(trimmed.to_string()));
    }

    let mut total = Duration::ZERO;
    for captures in DURATION_SEGMENT.captures_iter(&lower) {
        let number: u64 = captures["number"]
            .parse()
            .map_err(|_| DurationError::Overflow(trimmed.to_string()))?;
        let millis = match &captures["unit"] {
            "ms" => Some(number),
            "s" => number.checked_mul(1_000),
            "m" => number.checked_mul(60_000),
            "h" => number.checked_mul(3_600_000),
            _ => number.checked_mul(86_400_000),
        }
        .ok_or_else(|| DurationError::Overflow(trimmed.to_string()))?;
        total = total
            .checked_add(Duration::from_millis(millis))
            .ok_or_else(|| DurationError::Overflow(trimmed.to_string()))?;
    }

    if total.is_zero() {
        return Err(DurationError::Zero(trimmed.to_string()));
    }
    Ok(total)
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("spec.fetch must have at least one entry")]
    NoFetch,
    #[error("spec.fetch[{index}]: {source}")]
    Fetch {
        index: usize,
        #[source]
        source: SourceConfigError,
    },
    #[error(transparent)]
    Template(#[from] StepConfigError),
    #[error("spec.syncPeriod: {0}")]
    SyncPeriod(#[from] DurationError),
}

impl Classify for ValidationError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Config
    }
}

/// Resync interval from `syncPeriod`; unset or zero means only spec
/// changes trigger an attempt
pub fn sync_period(value: Option<&str>) -> Result<Option<Duration>, DurationError> {
    match value.map(parse_kubernetes_duration) {
        None | Some(Err(DurationError::Zero(_))) => Ok(None),
        Some(period) => period.map(Some),
    }
}

/// Validate an App spec as a whole
pub fn validate_app(spec: &AppSpec) -> Result<(), ValidationError> {
    if spec.fetch.is_empty() {
        return Err(ValidationError::NoFetch);
    }
    for (index, entry) in spec.fetch.iter().enumerate() {
        FetchSource::try_from(entry).map_err(|source| ValidationError::Fetch { index, source })?;
    }
    parse_steps(&spec.template)?;
    sync_period(spec.sync_period.as_deref())?;
    Ok(())
}
