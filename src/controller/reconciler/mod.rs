//! # Reconciler
//!
//! The reconciliation engine shared by `App` and `PackageRepository`.
//!
//! Each reconcile call:
//! - decides from the resource alone whether anything is due (spec change,
//!   sync period, backoff retry, manual trigger, interrupted attempt)
//! - admits at most one attempt per resource, folding triggers that arrive
//!   meanwhile into a single re-check
//! - runs the kind's stages, writing status at every stage boundary
//! - commits the outcome and computes the requeue
//!
//! ## Module Structure
//!
//! - `decision.rs` - Scheduling decision and derived phase
//! - `engine.rs` - Admission, finalizers, status writes and requeues
//! - `app.rs` - Fetch, Template, Deploy for Apps
//! - `finalize.rs` - App deletion
//! - `package_repository.rs` - Fetch, Unpack, Register for PackageRepositories
//! - `registry.rs` - Package document registration
//! - `status.rs` - Status transitions
//! - `store.rs` - Status and finalizer persistence
//! - `validation.rs` - Spec and duration validation

mod app;
pub mod decision;
mod engine;
mod finalize;
pub mod package_repository;
pub mod registry;
pub mod status;
pub mod store;
pub mod types;
pub mod validation;

pub use app::reconcile_app;
pub use decision::{decide, phase, trigger_annotation, AppPhase, Decision};
pub use package_repository::{reconcile_package_repository, unpack, UnpackError};
pub use registry::{KubeRegistry, PackageDocuments, PackageRegistry, RegisterError};
pub use store::{KubeStore, ResourceStore, StoreError};
pub use types::{Reconciler, ReconcilerError, TriggerSource};
pub use validation::{parse_kubernetes_duration, validate_app, DurationError, ValidationError};
