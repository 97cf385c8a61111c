//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Base retry interval after the first failed attempt (seconds)
pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 30;

/// Ceiling for the retry interval (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 600;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Default timeout for a single http fetch (seconds)
pub const DEFAULT_HTTP_FETCH_TIMEOUT_SECS: u64 = 60;

/// Default number of resources reconciled in parallel
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: usize = 10;

/// Raw tool output kept per stage in status (bytes, per stream)
pub const DEFAULT_STATUS_OUTPUT_LIMIT_BYTES: usize = 10_000;

/// Minimum delay between two progress-driven status writes during a deploy (ms)
pub const DEPLOY_PROGRESS_WRITE_INTERVAL_MS: u64 = 2_000;

/// Field manager used for status and metadata patches
pub const FIELD_MANAGER: &str = "app-controller";

/// API group of the App resource
pub const APP_GROUP: &str = "apps.octopilot.io";

/// API group of the PackageRepository resource
pub const PACKAGING_GROUP: &str = "packaging.octopilot.io";

/// API group of registered Package / PackageMetadata documents
pub const DATA_PACKAGING_GROUP: &str = "data.packaging.octopilot.io";

/// API version shared by all resources served by this controller
pub const API_VERSION: &str = "v1alpha1";

/// Finalizer held on an App until its cluster resources are deleted
pub const APP_FINALIZER: &str = "apps.octopilot.io/delete";

/// Finalizer held on a PackageRepository until its packages are unregistered
pub const PACKAGE_REPOSITORY_FINALIZER: &str = "packaging.octopilot.io/delete";

/// Annotation requesting an immediate reconciliation (`appctl app kick`)
/// The value is an opaque token; a new token means a new request.
pub const RECONCILE_TRIGGER_ANNOTATION: &str = "apps.octopilot.io/reconcile";

/// Label placed on registered packages pointing back at their repository
pub const PACKAGE_REPOSITORY_LABEL: &str = "packaging.octopilot.io/package-repository";

/// Suffix appended to an App name to form the kapp application name
pub const KAPP_APP_SUFFIX: &str = "-ctrl";
