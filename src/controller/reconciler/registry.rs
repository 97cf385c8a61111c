//! # Package Registry
//!
//! Registers the `Package` / `PackageMetadata` documents unpacked from a
//! PackageRepository and prunes the ones a newer revision no longer ships.
//! Every registered object carries the owning repository's name as a label;
//! the label is also how pruning finds its candidates.

use crate::constants::{FIELD_MANAGER, PACKAGE_REPOSITORY_LABEL};
use crate::controller::error::{Classify, ErrorClass};
use crate::crd::{Package, PackageMetadata};
use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Debug;
use tracing::{debug, info};

/// Documents unpacked from one repository revision
#[derive(Debug, Clone, Default)]
pub struct PackageDocuments {
    pub packages: Vec<Package>,
    pub metadata: Vec<PackageMetadata>,
}

impl PackageDocuments {
    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.len() + self.metadata.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn package_names(&self) -> BTreeSet<String> {
        self.packages.iter().map(ResourceExt::name_any).collect()
    }

    #[must_use]
    pub fn metadata_names(&self) -> BTreeSet<String> {
        self.metadata.iter().map(ResourceExt::name_any).collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("{kind} {name} is already registered by repository '{owner}'")]
    Conflict {
        kind: &'static str,
        name: String,
        owner: String,
    },
    #[error("failed to {action} {kind} {name}: {source}")]
    Api {
        action: &'static str,
        kind: &'static str,
        name: String,
        #[source]
        source: kube::Error,
    },
}

impl Classify for RegisterError {
    fn class(&self) -> ErrorClass {
        match self {
            // Resolving a clash needs one of the repositories to change
            RegisterError::Conflict { .. } => ErrorClass::Config,
            RegisterError::Api { .. } => ErrorClass::Transient,
        }
    }
}

/// Cluster-side store of package documents
#[async_trait]
pub trait PackageRegistry: Send + Sync {
    /// Create or update `documents` in `namespace`, labeled with `repository`
    async fn register(
        &self,
        namespace: &str,
        repository: &str,
        documents: &PackageDocuments,
    ) -> Result<(), RegisterError>;

    /// Delete documents labeled with `repository` that are not in `keep`,
    /// returning how many were removed
    async fn prune(
        &self,
        namespace: &str,
        repository: &str,
        keep: &PackageDocuments,
    ) -> Result<usize, RegisterError>;
}

/// [`PackageRegistry`] backed by server-side apply
pub struct KubeRegistry {
    client: Client,
}

impl Debug for KubeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeRegistry").finish_non_exhaustive()
    }
}

impl KubeRegistry {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn repository_selector(repository: &str) -> String {
    format!("{PACKAGE_REPOSITORY_LABEL}={repository}")
}

/// Copy of `doc` ready for apply: namespaced, labeled, server fields cleared
fn prepared<K>(doc: &K, namespace: &str, repository: &str) -> K
where
    K: Resource + Clone,
{
    let mut doc = doc.clone();
    let meta = doc.meta_mut();
    meta.namespace = Some(namespace.to_string());
    meta.resource_version = None;
    meta.uid = None;
    meta.managed_fields = None;
    meta.creation_timestamp = None;
    meta.labels
        .get_or_insert_with(Default::default)
        .insert(PACKAGE_REPOSITORY_LABEL.to_string(), repository.to_string());
    doc
}

async fn apply_all<K>(
    api: &Api<K>,
    kind: &'static str,
    namespace: &str,
    repository: &str,
    docs: &[K],
) -> Result<(), RegisterError>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug,
{
    let params = PatchParams::apply(FIELD_MANAGER).force();
    for doc in docs {
        let name = doc.name_any();
        let existing = api.get_opt(&name).await.map_err(|source| RegisterError::Api {
            action: "read",
            kind,
            name: name.clone(),
            source,
        })?;
        if let Some(owner) = existing
            .as_ref()
            .and_then(|e| e.labels().get(PACKAGE_REPOSITORY_LABEL))
            .filter(|owner| owner.as_str() != repository)
        {
            return Err(RegisterError::Conflict {
                kind,
                name,
                owner: owner.clone(),
            });
        }

        let body = prepared(doc, namespace, repository);
        api.patch(&name, &params, &Patch::Apply(&body))
            .await
            .map_err(|source| RegisterError::Api {
                action: "apply",
                kind,
                name: name.clone(),
                source,
            })?;
        debug!(kind, name = %name, namespace, repository, "registered");
    }
    Ok(())
}

async fn prune_kind<K>(
    api: &Api<K>,
    kind: &'static str,
    repository: &str,
    keep: &BTreeSet<String>,
) -> Result<usize, RegisterError>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug,
{
    let listed = api
        .list(&ListParams::default().labels(&repository_selector(repository)))
        .await
        .map_err(|source| RegisterError::Api {
            action: "list",
            kind,
            name: format!("(repository {repository})"),
            source,
        })?;

    let mut removed = 0;
    for stale in listed.items.iter().filter(|d| !keep.contains(&d.name_any())) {
        let name = stale.name_any();
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(ref e)) if e.code == 404 => {}
            Err(source) => {
                return Err(RegisterError::Api {
                    action: "delete",
                    kind,
                    name,
                    source,
                })
            }
        }
        info!(kind, name = %name, repository, "pruned document no longer in repository");
        removed += 1;
    }
    Ok(removed)
}

#[async_trait]
impl PackageRegistry for KubeRegistry {
    async fn register(
        &self,
        namespace: &str,
        repository: &str,
        documents: &PackageDocuments,
    ) -> Result<(), RegisterError> {
        let metadata: Api<PackageMetadata> = Api::namespaced(self.client.clone(), namespace);
        apply_all(&metadata, "PackageMetadata", namespace, repository, &documents.metadata)
            .await?;
        let packages: Api<Package> = Api::namespaced(self.client.clone(), namespace);
        apply_all(&packages, "Package", namespace, repository, &documents.packages).await
    }

    async fn prune(
        &self,
        namespace: &str,
        repository: &str,
        keep: &PackageDocuments,
    ) -> Result<usize, RegisterError> {
        let packages: Api<Package> = Api::namespaced(self.client.clone(), namespace);
        let mut removed =
            prune_kind(&packages, "Package", repository, &keep.package_names()).await?;
        let metadata: Api<PackageMetadata> = Api::namespaced(self.client.clone(), namespace);
        removed +=
            prune_kind(&metadata, "PackageMetadata", repository, &keep.metadata_names()).await?;
        Ok(removed)
    }
}
