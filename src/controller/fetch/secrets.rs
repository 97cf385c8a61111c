//! # Resource Lookup
//!
//! Secrets and ConfigMaps referenced by fetch sources, read from the owning
//! resource's namespace.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Api, Client};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },
    #[error("failed to get {kind} {namespace}/{name}: {message}")]
    Api {
        kind: &'static str,
        namespace: String,
        name: String,
        message: String,
    },
}

/// Reads Secrets and ConfigMaps
#[async_trait]
pub trait ResourceLookup: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, LookupError>;
    async fn get_config_map(&self, namespace: &str, name: &str)
        -> Result<ConfigMap, LookupError>;
}

/// [`ResourceLookup`] against the Kubernetes API
#[derive(Clone)]
pub struct KubeLookup {
    client: Client,
}

impl std::fmt::Debug for KubeLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeLookup").finish_non_exhaustive()
    }
}

impl KubeLookup {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

async fn get_namespaced<K>(
    client: &Client,
    kind: &'static str,
    namespace: &str,
    name: &str,
) -> Result<K, LookupError>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
{
    debug!(kind, namespace, name, "looking up referenced resource");
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    match api.get(name).await {
        Ok(object) => Ok(object),
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => Err(LookupError::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }),
        Err(e) => Err(LookupError::Api {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            message: e.to_string(),
        }),
    }
}

#[async_trait]
impl ResourceLookup for KubeLookup {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, LookupError> {
        get_namespaced(&self.client, "Secret", namespace, name).await
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ConfigMap, LookupError> {
        get_namespaced(&self.client, "ConfigMap", namespace, name).await
    }
}

/// Decoded key/value pairs of a Secret (`data` and `stringData`)
#[must_use]
pub fn secret_entries(secret: &Secret) -> BTreeMap<String, Vec<u8>> {
    let mut entries: BTreeMap<String, Vec<u8>> = secret
        .data
        .iter()
        .flatten()
        .map(|(k, v)| (k.clone(), v.0.clone()))
        .collect();
    for (k, v) in secret.string_data.iter().flatten() {
        entries.insert(k.clone(), v.clone().into_bytes());
    }
    entries
}

/// Key/value pairs of a ConfigMap (`data` and `binaryData`)
#[must_use]
pub fn config_map_entries(config_map: &ConfigMap) -> BTreeMap<String, Vec<u8>> {
    let mut entries: BTreeMap<String, Vec<u8>> = config_map
        .data
        .iter()
        .flatten()
        .map(|(k, v)| (k.clone(), v.clone().into_bytes()))
        .collect();
    for (k, v) in config_map.binary_data.iter().flatten() {
        entries.insert(k.clone(), v.0.clone());
    }
    entries
}

/// Re-stamp a fetched Secret for inclusion in a tool's input stream
///
/// Only the name, type and data survive; server-managed metadata (uid,
/// resourceVersion, managedFields, owner references) is dropped.
#[must_use]
pub fn restamp_secret(secret: &Secret) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: secret.metadata.name.clone(),
            ..ObjectMeta::default()
        },
        data: secret.data.clone(),
        string_data: secret.string_data.clone(),
        type_: secret.type_.clone(),
        immutable: None,
    }
}

/// Serialize a re-stamped Secret with explicit `apiVersion` / `kind`
pub fn secret_document(secret: &Secret) -> Result<String, serde_yaml::Error> {
    let mut value = serde_json::to_value(restamp_secret(secret))
        .map_err(<serde_yaml::Error as serde::ser::Error>::custom)?;
    if let Some(object) = value.as_object_mut() {
        object.insert("apiVersion".to_string(), serde_json::Value::from("v1"));
        object.insert("kind".to_string(), serde_json::Value::from("Secret"));
    }
    serde_yaml::to_string(&value)
}
