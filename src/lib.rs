//! App Controller Library
//!
//! Reconciles `App` and `PackageRepository` resources: fetch content,
//! render it through template steps and apply the result with kapp.
//!
//! ## Quick Start
//!
//! ```rust
//! use app_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod client;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod exec;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod server;
