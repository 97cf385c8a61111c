//! # Controller
//!
//! Core controller modules.
//!
//! - `backoff`: Exponential retry schedule for failed attempts
//! - `deploy`: kapp deploy, delete and inspect
//! - `error`: Stage error classification
//! - `fetch`: Content source resolution
//! - `in_flight`: Per-resource attempt admission
//! - `reconciler`: Reconciliation engine for App and PackageRepository
//! - `template`: Template step pipeline

pub mod backoff;
pub mod deploy;
pub mod error;
pub mod fetch;
pub mod in_flight;
pub mod reconciler;
pub mod template;
