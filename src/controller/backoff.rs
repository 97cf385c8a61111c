//! # Exponential Backoff
//!
//! Maps the number of consecutive failed attempts for a resource to the delay
//! before the next attempt.
//!
//! The delay doubles from a base interval up to a ceiling:
//! `delay(n) = min(base * 2^(n-1), max)` for `n >= 1`. A success resets the
//! failure count, so the next failure starts again at `base`.
//!
//! ## Usage
//!
//! ```rust
//! use app_controller::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let backoff = ExponentialBackoff::new(Duration::from_secs(30), Duration::from_secs(600));
//! assert_eq!(backoff.delay(1), Duration::from_secs(30));
//! assert_eq!(backoff.delay(2), Duration::from_secs(60));
//! assert_eq!(backoff.delay(3), Duration::from_secs(120));
//! assert_eq!(backoff.delay(10), Duration::from_secs(600));
//! ```

use std::time::Duration;

/// Exponential backoff policy
///
/// The policy is stateless; the failure count is persisted on the resource
/// status (`consecutiveReconcileFailures`) so schedules survive restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a policy doubling from `base` up to `max`.
    /// A `max` below `base` is raised to `base`.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    #[must_use]
    pub fn base(&self) -> Duration {
        self.base
    }

    #[must_use]
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Delay before the attempt following `consecutive_failures` failures
    ///
    /// `0` failures yields the base interval, which is what a freshly
    /// failing resource waits before its first retry.
    #[must_use]
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(crate::constants::DEFAULT_BACKOFF_BASE_SECS),
            Duration::from_secs(crate::constants::DEFAULT_BACKOFF_MAX_SECS),
        )
    }
}
