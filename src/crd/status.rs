//! # KeyVaultSecretSync Status
//!
//! Status types for tracking reconciliation state and conditions.

use serde::{Deserialize, Serialize};

/// Status of the KeyVaultSecretSync resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeyVaultSecretSyncStatus {
    /// Current phase of reconciliation
    /// Values: Idle, Syncing, Settled, Failed, Suspended
    #[serde(default)]
    pub phase: Option<String>,
    /// Human-readable description of current state
    #[serde(default)]
    pub description: Option<String>,
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Observed generation
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Last reconciliation time (RFC3339)
    #[serde(default)]
    pub last_reconcile_time: Option<String>,
    /// Next scheduled refresh (RFC3339)
    /// Used to persist the refresh schedule across controller restarts
    #[serde(default)]
    pub next_reconcile_time: Option<String>,
    /// Identity binding established for the workload service account
    #[serde(default)]
    pub identity: Option<IdentityBindingStatus>,
    /// Per local secret sync state
    #[serde(default)]
    pub secrets: Vec<SyncedSecretStatus>,
}

/// Identity binding as recorded in status
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdentityBindingStatus {
    pub namespace: String,
    pub service_account: String,
    pub client_id: String,
    pub issuer_url: String,
}

/// Sync state of one materialized secret
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncedSecretStatus {
    /// Kubernetes Secret name
    pub local_name: String,
    pub vault_name: String,
    pub secret_name: String,
    /// Pinned version requested in the spec, if any
    #[serde(default)]
    pub version: Option<String>,
    /// Key Vault version currently materialized
    pub last_synced_version: String,
    /// Creation time (unix seconds) of the materialized version
    #[serde(default)]
    pub last_synced_version_created: i64,
    /// Time the materialized value was last written (RFC3339)
    pub last_synced_at: String,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
}
