//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::controller::backoff::ExponentialBackoff;
use std::path::PathBuf;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Retry interval after the first consecutive failure (seconds)
    pub backoff_base_secs: u64,
    /// Upper bound for the retry interval (seconds)
    pub backoff_max_secs: u64,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Watch stream restart delay after stream ends (seconds)
    pub watch_restart_delay_after_end_secs: u64,
    /// Maximum concurrent reconciliations
    /// Limits how many resources can be reconciled simultaneously
    pub max_concurrent_reconciliations: usize,
    /// Root under which each attempt creates its exclusive scratch directory
    pub scratch_dir: PathBuf,
    /// Timeout for a single http fetch (seconds)
    pub http_fetch_timeout_secs: u64,
    /// Port of the metrics / probe server
    pub metrics_port: u16,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Bytes of stdout/stderr kept per stage in status
    pub status_output_limit_bytes: usize,
    /// Locations of the external tools
    pub tools: ToolPaths,
}

/// Executable names or paths of the external tools the controller drives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub kapp: String,
    pub vendir: String,
    pub ytt: String,
    pub kbld: String,
    pub helm: String,
    pub kustomize: String,
    pub tar: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            kapp: "kapp".to_string(),
            vendir: "vendir".to_string(),
            ytt: "ytt".to_string(),
            kbld: "kbld".to_string(),
            helm: "helm".to_string(),
            kustomize: "kustomize".to_string(),
            tar: "tar".to_string(),
        }
    }
}

impl ToolPaths {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            kapp: env_var_or_default_str("KAPP_BIN", &defaults.kapp),
            vendir: env_var_or_default_str("VENDIR_BIN", &defaults.vendir),
            ytt: env_var_or_default_str("YTT_BIN", &defaults.ytt),
            kbld: env_var_or_default_str("KBLD_BIN", &defaults.kbld),
            helm: env_var_or_default_str("HELM_BIN", &defaults.helm),
            kustomize: env_var_or_default_str("KUSTOMIZE_BIN", &defaults.kustomize),
            tar: env_var_or_default_str("TAR_BIN", &defaults.tar),
        }
    }

    /// Tools that cannot be resolved on `PATH`, as `(name, configured value)` pairs
    #[must_use]
    pub fn missing(&self) -> Vec<(&'static str, &str)> {
        [
            ("kapp", self.kapp.as_str()),
            ("vendir", self.vendir.as_str()),
            ("ytt", self.ytt.as_str()),
            ("kbld", self.kbld.as_str()),
            ("helm", self.helm.as_str()),
            ("kustomize", self.kustomize.as_str()),
            ("tar", self.tar.as_str()),
        ]
        .into_iter()
        .filter(|(_, bin)| which::which(bin).is_err())
        .collect()
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            backoff_base_secs: DEFAULT_BACKOFF_BASE_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_restart_delay_after_end_secs: DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            scratch_dir: std::env::temp_dir(),
            http_fetch_timeout_secs: DEFAULT_HTTP_FETCH_TIMEOUT_SECS,
            metrics_port: DEFAULT_METRICS_PORT,
            log_level: "INFO".to_string(),
            status_output_limit_bytes: DEFAULT_STATUS_OUTPUT_LIMIT_BYTES,
            tools: ToolPaths::default(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            backoff_base_secs: env_var_or_default("BACKOFF_BASE_SECS", DEFAULT_BACKOFF_BASE_SECS),
            backoff_max_secs: env_var_or_default("BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            watch_restart_delay_after_end_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            scratch_dir: std::env::var("SCRATCH_DIR")
                .map_or_else(|_| std::env::temp_dir(), PathBuf::from),
            http_fetch_timeout_secs: env_var_or_default(
                "HTTP_FETCH_TIMEOUT_SECS",
                DEFAULT_HTTP_FETCH_TIMEOUT_SECS,
            ),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            log_level: env_var_or_default_str("LOG_LEVEL", "INFO"),
            status_output_limit_bytes: env_var_or_default(
                "STATUS_OUTPUT_LIMIT_BYTES",
                DEFAULT_STATUS_OUTPUT_LIMIT_BYTES,
            ),
            tools: ToolPaths::from_env(),
        }
    }

    /// Backoff policy for failed attempts
    #[must_use]
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_secs(self.backoff_base_secs),
            Duration::from_secs(self.backoff_max_secs),
        )
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Get watch restart delay after end duration
    #[must_use]
    pub fn watch_restart_delay_after_end_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_after_end_secs)
    }

    /// Get http fetch timeout duration
    #[must_use]
    pub fn http_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.http_fetch_timeout_secs)
    }

    /// `EnvFilter` directive derived from `LOG_LEVEL`
    #[must_use]
    pub fn log_directive(&self) -> String {
        format!("app_controller={}", self.log_level.to_lowercase())
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
