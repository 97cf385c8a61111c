//! # Client
//!
//! Client-side helpers shared by `appctl`: OCI reference parsing, building
//! `PackageRepository` specs from a URL, and waiting for a resource to
//! reconcile by polling its status.

pub mod reference;
pub mod repository;
pub mod wait;

pub use reference::{ImageReference, ReferenceError};
pub use repository::{add_or_update, repository_spec, AddOrUpdate, RepositoryError};
pub use wait::{
    wait_for_reconcile, DedupingMessages, KubeStatusSource, MessageSink, ObservedStatus,
    StatusSource, StdoutSink, WaitError,
};
