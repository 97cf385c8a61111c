//! # Prelude
//!
//! Re-exports commonly used types and traits.
//!
//! ```rust
//! use app_controller::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Reconciler types
pub use crate::controller::reconciler::{
    reconcile_app, reconcile_package_repository, Reconciler, ReconcilerError, TriggerSource,
};

// Stage seams, for embedding the engine with other implementations
pub use crate::controller::deploy::Deployer;
pub use crate::controller::error::{Classify, ErrorClass, Stage, StageFailure};
pub use crate::controller::reconciler::{PackageRegistry, ResourceStore};
pub use crate::exec::CommandRunner;

// Config types
pub use crate::config::ControllerConfig;
