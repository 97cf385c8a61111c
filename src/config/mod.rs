//! # Configuration
//!
//! Process-wide controller settings. Per-resource behaviour lives in the CRDs.

mod controller;

pub use controller::{ControllerConfig, ToolPaths};
