//! # Runtime
//!
//! Process startup and the controller watch loops.
//!
//! - `initialization.rs` - rustls, tracing, metrics, probe server, client and context
//! - `watch_loop.rs` - One kube-runtime controller per reconciled kind
//! - `error_policy.rs` - Requeue on engine errors and watch stream error handling

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

pub use initialization::{initialize, InitializationResult};
pub use watch_loop::run_watch_loop;
