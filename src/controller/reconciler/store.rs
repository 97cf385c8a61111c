//! # Resource Store
//!
//! The engine's only path to the API server: whole-status replacement,
//! finalizer updates, fresh reads and generation re-reads. Kept behind a trait so the
//! engine can be driven against an in-memory store in tests.

use crate::crd::Reconcilable;
use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::core::object::HasStatus;
use kube::{Api, Client, ResourceExt};
use std::marker::PhantomData;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),
    #[error("failed to serialize status: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Persistence of controller-owned state for one resource kind
#[async_trait]
pub trait ResourceStore<K: Reconcilable>: Send + Sync {
    /// Replace the whole status of `resource`
    async fn write_status(
        &self,
        resource: &K,
        status: &<K as HasStatus>::Status,
    ) -> Result<(), StoreError>;

    /// The object as the API server has it now, bypassing the watch cache
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError>;

    /// Current `metadata.generation`, `None` once the object is gone
    async fn generation(&self, namespace: &str, name: &str) -> Result<Option<i64>, StoreError>;

    /// Replace `metadata.finalizers`
    async fn set_finalizers(&self, resource: &K, finalizers: Vec<String>)
        -> Result<(), StoreError>;
}

/// [`ResourceStore`] backed by the Kubernetes API
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> std::fmt::Debug for KubeStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl<K: Reconcilable> KubeStore<K> {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn namespace_of<K: Reconcilable>(resource: &K) -> String {
    resource.namespace().unwrap_or_else(|| "default".to_string())
}

#[async_trait]
impl<K: Reconcilable> ResourceStore<K> for KubeStore<K> {
    async fn write_status(
        &self,
        resource: &K,
        status: &<K as HasStatus>::Status,
    ) -> Result<(), StoreError> {
        let name = resource.name_any();
        let namespace = namespace_of(resource);
        // Merge patch of the full status: every field is serialized, so
        // values left from earlier attempts are overwritten or cleared
        let patch = serde_json::json!({ "status": serde_json::to_value(status)? });
        self.api(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| match e {
                kube::Error::Api(ref api_err) if api_err.code == 404 => StoreError::NotFound {
                    kind: K::KIND_LABEL,
                    namespace: namespace.clone(),
                    name: name.clone(),
                },
                other => StoreError::Api(other),
            })?;
        debug!(resource.name = %name, resource.namespace = %namespace, "status written");
        Ok(())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn generation(&self, namespace: &str, name: &str) -> Result<Option<i64>, StoreError> {
        let current = self.get(namespace, name).await?;
        Ok(current.and_then(|r| r.meta().generation))
    }

    async fn set_finalizers(
        &self,
        resource: &K,
        finalizers: Vec<String>,
    ) -> Result<(), StoreError> {
        let name = resource.name_any();
        let namespace = namespace_of(resource);
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        self.api(&namespace)
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(resource.name = %name, resource.namespace = %namespace, ?finalizers, "finalizers updated");
        Ok(())
    }
}
