//! # Package Repository Commands
//!
//! Builds `PackageRepository` specs from an OCI bundle URL and creates or
//! updates them.

use super::reference::{ImageReference, ReferenceError};
use crate::crd::{
    AppFetch, FetchImgpkgBundle, PackageRepository, PackageRepositorySpec, VersionSelection,
    VersionSelectionSemver,
};
use kube::api::{Api, PostParams};
use kube::core::ObjectMeta;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Parsing OCI registry URL: {0}")]
    Url(#[from] ReferenceError),
    #[error("package repository '{namespace}/{name}' does not exist (use --create to create it)")]
    NotFound { namespace: String, name: String },
    #[error(transparent)]
    Api(#[from] kube::Error),
}

/// What [`add_or_update`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOrUpdate {
    Created,
    Updated,
}

/// Spec fetching the imgpkg bundle at `url`
///
/// A URL without tag or digest selects the highest semver tag; it never
/// becomes `latest`. An explicit `:latest` is kept as written.
///
/// # Errors
///
/// Returns [`RepositoryError::Url`] when `url` is not an OCI reference
pub fn repository_spec(url: &str) -> Result<PackageRepositorySpec, RepositoryError> {
    let reference = ImageReference::parse(url)?;
    let tag_selection = (!reference.is_pinned()).then(|| VersionSelection {
        semver: Some(VersionSelectionSemver::default()),
    });
    debug!(
        url,
        tag = reference.tag.as_deref().unwrap_or(""),
        semver = tag_selection.is_some(),
        "built package repository spec"
    );

    Ok(PackageRepositorySpec {
        fetch: AppFetch {
            imgpkg_bundle: Some(FetchImgpkgBundle {
                image: url.trim().to_string(),
                tag_selection,
                secret_ref: None,
            }),
            ..AppFetch::default()
        },
        ..PackageRepositorySpec::default()
    })
}

/// Point the repository `name` at `url`, creating it when allowed
///
/// The whole spec is replaced, so a previously paused repository resumes.
///
/// # Errors
///
/// Returns [`RepositoryError::NotFound`] when the repository is missing and
/// `create` is false, and API errors otherwise
pub async fn add_or_update(
    api: &Api<PackageRepository>,
    namespace: &str,
    name: &str,
    url: &str,
    create: bool,
) -> Result<AddOrUpdate, RepositoryError> {
    let spec = repository_spec(url)?;

    match api.get_opt(name).await? {
        Some(mut existing) => {
            existing.spec = spec;
            api.replace(name, &PostParams::default(), &existing).await?;
            Ok(AddOrUpdate::Updated)
        }
        None if create => {
            let repository = PackageRepository {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..ObjectMeta::default()
                },
                spec,
                status: None,
            };
            api.create(&PostParams::default(), &repository).await?;
            Ok(AddOrUpdate::Created)
        }
        None => Err(RepositoryError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }),
    }
}
