//! # Custom Resource Definitions
//!
//! CRD types served by the controller.
//!
//! ## Module Structure
//!
//! - `app.rs` - `App` spec, deploy options and status
//! - `package_repository.rs` - `PackageRepository` spec and status
//! - `package.rs` - `Package` / `PackageMetadata` documents registered from repositories
//! - `fetch.rs` - Fetch source wire types and the validated `FetchSource`
//! - `template.rs` - Template step wire types
//! - `status.rs` - Conditions and status bookkeeping shared by all kinds

mod app;
mod fetch;
mod package;
mod package_repository;
mod status;
mod template;

use k8s_openapi::NamespaceResourceScope;
use kube::core::object::HasStatus;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

// Re-export all public types
pub use app::{
    App, AppDeploy, AppSpec, AppStatus, KappDeleteOptions, KappInspectOptions, KappOptions,
};
pub use fetch::{
    AppFetch, FetchGit, FetchHelmChart, FetchHttp, FetchImage, FetchImgpkgBundle, FetchInline,
    FetchInlineSource, FetchInlineSourceRef, FetchSource, HelmChartRepository,
    LocalObjectReference, SourceConfigError, VersionSelection, VersionSelectionSemver,
};
pub use package::{
    Maintainer, Package, PackageMetadata, PackageMetadataSpec, PackageSpec, PackageTemplate,
};
pub use package_repository::{
    PackageRepository, PackageRepositorySpec, PackageRepositoryStatus,
};
pub use status::{
    AttemptStatus, Condition, ConditionStatus, ConditionType, GenericStatus, ReconcileStatus,
    StageStatus,
};
pub use template::{
    AppTemplate, HelmTemplate, KbldTemplate, KustomizeTemplate, StepConfigError, TemplateStep,
    TemplateValue, YttTemplate,
};

/// A resource kind driven by the reconciliation engine
pub trait Reconcilable:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + HasStatus<Status: ReconcileStatus>
    + DeserializeOwned
    + Serialize
    + Clone
    + std::fmt::Debug
    + Send
    + Sync
    + 'static
{
    /// Kind name used in logs and metric labels
    const KIND_LABEL: &'static str;
    /// Finalizer held while the resource owns cluster state
    const FINALIZER: &'static str;

    fn paused(&self) -> bool;
    fn canceled(&self) -> bool;
    fn sync_period(&self) -> Option<&str>;
}
