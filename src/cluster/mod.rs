//! # Cluster Access
//!
//! Seams to the Kubernetes objects the controller writes.
//!
//! - `SecretSink` reads and writes the local `Secret` materialized from a remote secret
//! - `ServiceAccountStore` reads and annotates the workload's `ServiceAccount`
//!
//! The kube-backed implementations use server-side apply with the controller's
//! field manager so repeated writes are idempotent.

use crate::constants::FIELD_MANAGER;
use crate::provider::SecretValue;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Errors talking to the Kubernetes API
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// Transient: connection failures, conflicts, server errors
    #[error("Kubernetes request for {object} failed: {message}")]
    Request { object: String, message: String },
    /// Fatal: the controller's RBAC does not allow the operation
    #[error("Kubernetes denied access to {object}: {message}")]
    Forbidden { object: String, message: String },
}

impl ClusterError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Request { .. })
    }

    fn from_kube(object: String, error: kube::Error) -> Self {
        match error {
            kube::Error::Api(api_err) if api_err.code == 401 || api_err.code == 403 => {
                Self::Forbidden {
                    object,
                    message: api_err.message,
                }
            }
            other => Self::Request {
                object,
                message: other.to_string(),
            },
        }
    }
}

/// Metadata of an existing local secret, enough to decide ownership and freshness
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalSecretState {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// Everything needed to write one local secret
#[derive(Debug, Clone)]
pub struct SecretMaterial {
    pub namespace: String,
    pub name: String,
    pub key: String,
    pub value: SecretValue,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub owner_reference: Option<OwnerReference>,
}

/// Local secret store
#[async_trait]
pub trait SecretSink: Send + Sync {
    /// Metadata of the named secret, `None` if it does not exist
    async fn current(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<LocalSecretState>, ClusterError>;

    /// Create or replace the secret content
    async fn write(&self, material: &SecretMaterial) -> Result<(), ClusterError>;
}

/// Service account annotation store
#[async_trait]
pub trait ServiceAccountStore: Send + Sync {
    /// Annotations of the named service account, `None` if it does not exist
    async fn annotations(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ClusterError>;

    /// Apply annotations, creating the service account if missing
    async fn annotate(
        &self,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError>;
}

/// `SecretSink` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretSink {
    client: Client,
}

impl std::fmt::Debug for KubeSecretSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretSink").finish_non_exhaustive()
    }
}

impl KubeSecretSink {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Build the typed `Secret` applied for a material
#[must_use]
pub fn secret_manifest(material: &SecretMaterial) -> Secret {
    let mut data = BTreeMap::new();
    data.insert(
        material.key.clone(),
        ByteString(material.value.expose().as_bytes().to_vec()),
    );

    Secret {
        metadata: ObjectMeta {
            name: Some(material.name.clone()),
            namespace: Some(material.namespace.clone()),
            labels: Some(material.labels.clone()),
            annotations: Some(material.annotations.clone()),
            owner_references: material.owner_reference.clone().map(|owner| vec![owner]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

#[async_trait]
impl SecretSink for KubeSecretSink {
    async fn current(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<LocalSecretState>, ClusterError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets
            .get_opt(name)
            .await
            .map_err(|e| ClusterError::from_kube(format!("secret {namespace}/{name}"), e))?;

        Ok(secret.map(|s| LocalSecretState {
            labels: s.metadata.labels.unwrap_or_default(),
            annotations: s.metadata.annotations.unwrap_or_default(),
        }))
    }

    async fn write(&self, material: &SecretMaterial) -> Result<(), ClusterError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &material.namespace);
        let manifest = secret_manifest(material);

        secrets
            .patch(
                &material.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&manifest),
            )
            .await
            .map_err(|e| {
                ClusterError::from_kube(
                    format!("secret {}/{}", material.namespace, material.name),
                    e,
                )
            })?;

        debug!(
            namespace = material.namespace.as_str(),
            secret = material.name.as_str(),
            "Applied local secret"
        );
        Ok(())
    }
}

/// `ServiceAccountStore` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeServiceAccounts {
    client: Client,
}

impl std::fmt::Debug for KubeServiceAccounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeServiceAccounts").finish_non_exhaustive()
    }
}

impl KubeServiceAccounts {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceAccountStore for KubeServiceAccounts {
    async fn annotations(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ClusterError> {
        let accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let account = accounts.get_opt(name).await.map_err(|e| {
            ClusterError::from_kube(format!("serviceaccount {namespace}/{name}"), e)
        })?;

        Ok(account.map(|sa| sa.metadata.annotations.unwrap_or_default()))
    }

    async fn annotate(
        &self,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        let accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ServiceAccount",
            "metadata": {
                "name": name,
                "namespace": namespace,
                "annotations": annotations,
            }
        });

        accounts
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&patch))
            .await
            .map_err(|e| {
                ClusterError::from_kube(format!("serviceaccount {namespace}/{name}"), e)
            })?;
        Ok(())
    }
}
