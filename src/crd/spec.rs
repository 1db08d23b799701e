//! # KeyVaultSecretSync Spec
//!
//! Main CRD specification types and default values.

use serde::{Deserialize, Serialize};

/// KeyVaultSecretSync Custom Resource Definition
///
/// Declares which Azure Key Vault secrets are materialized as Kubernetes
/// Secrets in the resource namespace, and which service account is federated
/// with the Azure managed identity that reads them.
///
/// # Example
///
/// ```yaml
/// apiVersion: keyvault-sync.gitops.io/v1beta1
/// kind: KeyVaultSecretSync
/// metadata:
///   name: solr-auth
///   namespace: solr
/// spec:
///   vaultName: solr-kv
///   identity:
///     serviceAccount: solr
///     clientId: 00000000-0000-0000-0000-000000000000
///     identityResourceId: /subscriptions/.../userAssignedIdentities/solr-identity
///   secrets:
///     - secretName: solr-admin-password
///       localName: solr-basic-auth
///       key: password
///   refreshInterval: 5m
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "KeyVaultSecretSync",
    group = "keyvault-sync.gitops.io",
    version = "v1beta1",
    namespaced,
    status = "crate::crd::KeyVaultSecretSyncStatus",
    shortname = "kvss",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}, {"name":"Description", "type":"string", "jsonPath":".status.description"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KeyVaultSecretSyncSpec {
    /// Azure Key Vault name (e.g. "solr-kv") or full vault URL
    pub vault_name: String,
    /// Workload identity to federate with the resource's service account
    pub identity: IdentityConfig,
    /// Secrets to materialize, one Kubernetes Secret per entry
    pub secrets: Vec<SecretMapping>,
    /// How often Key Vault is polled for new versions
    /// Format: Kubernetes duration string (e.g. "30s", "5m", "1h")
    /// Minimum: 30s
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: String,
    /// Suspend reconciliation
    /// When true, the controller skips this resource and leaves materialized secrets untouched
    #[serde(default)]
    pub suspend: bool,
}

/// Workload identity federation settings
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdentityConfig {
    /// Service account in the resource namespace used by the workload
    /// Created with the workload identity annotations if it does not exist
    pub service_account: String,
    /// Client ID of the Azure managed identity (or app registration)
    pub client_id: String,
    /// Entra ID tenant; written as `azure.workload.identity/tenant-id` when set
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// OIDC issuer of the cluster
    /// Defaults to the controller's `OIDC_ISSUER_URL`
    #[serde(default)]
    pub issuer_url: Option<String>,
    /// ARM resource ID of the user-assigned managed identity
    /// When set, the controller creates the federated identity credential itself.
    /// When omitted, federation is expected to exist already and only the
    /// service account is annotated.
    #[serde(default)]
    pub identity_resource_id: Option<String>,
}

/// One Key Vault secret materialized as one Kubernetes Secret
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretMapping {
    /// Secret name in Key Vault
    pub secret_name: String,
    /// Pinned Key Vault version; latest when omitted
    ///
    /// Pinning an older version than the one materialized rolls the local Secret back.
    #[serde(default)]
    pub version: Option<String>,
    /// Name of the Kubernetes Secret written in the resource namespace
    /// Must be unique per namespace
    pub local_name: String,
    /// Data key inside the Kubernetes Secret; defaults to `secretName`
    #[serde(default)]
    pub key: Option<String>,
}

impl SecretMapping {
    /// Data key the value is stored under
    #[must_use]
    pub fn data_key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.secret_name)
    }
}

/// Default value for refresh interval
pub fn default_refresh_interval() -> String {
    "5m".to_string()
}
