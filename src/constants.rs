//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of the `KeyVaultSecretSync` custom resource
pub const API_GROUP: &str = "keyvault-sync.gitops.io";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "keyvault-sync-controller";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Upper bound for any single call to Key Vault, Entra ID, ARM or the cluster API (seconds)
pub const DEFAULT_EXTERNAL_CALL_TIMEOUT_SECS: u64 = 10;

/// Number of fetch attempts made inside a single sync before giving up
pub const DEFAULT_FETCH_MAX_ATTEMPTS: u32 = 3;

/// Exponential fetch retry starting delay (milliseconds)
pub const DEFAULT_FETCH_BACKOFF_START_MS: u64 = 500;

/// Exponential fetch retry maximum delay (milliseconds)
pub const DEFAULT_FETCH_BACKOFF_MAX_MS: u64 = 8_000;

/// Default delay before restarting the watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Minimum refresh interval accepted on a `KeyVaultSecretSync` (seconds)
pub const MIN_REFRESH_INTERVAL_SECS: u64 = 30;

/// Default number of resources reconciled in parallel
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Label naming the `KeyVaultSecretSync` that owns a materialized secret
pub const OWNER_LABEL: &str = "keyvault-sync.gitops.io/owner";

/// Annotation holding the Key Vault version id of the materialized value
pub const VERSION_ANNOTATION: &str = "keyvault-sync.gitops.io/version";

/// Annotation holding the creation time (unix seconds) of that version
pub const VERSION_CREATED_ANNOTATION: &str = "keyvault-sync.gitops.io/version-created";

/// Annotation holding the RFC3339 time of the last write
pub const SYNCED_AT_ANNOTATION: &str = "keyvault-sync.gitops.io/synced-at";

/// Annotation holding the SHA-256 of the materialized key and value
pub const CONTENT_HASH_ANNOTATION: &str = "keyvault-sync.gitops.io/content-sha256";

/// Annotation holding the `vault/secret` reference the value came from
pub const SOURCE_ANNOTATION: &str = "keyvault-sync.gitops.io/source";

/// Annotation that requests an immediate reconciliation when present
pub const RECONCILE_ANNOTATION: &str = "keyvault-sync.gitops.io/reconcile";

/// Service account annotation read by the Azure workload identity webhook
pub const WORKLOAD_IDENTITY_CLIENT_ID_ANNOTATION: &str = "azure.workload.identity/client-id";

/// Optional tenant override for the Azure workload identity webhook
pub const WORKLOAD_IDENTITY_TENANT_ID_ANNOTATION: &str = "azure.workload.identity/tenant-id";

/// Audience of federated service account tokens exchanged with Entra ID
pub const FEDERATED_TOKEN_AUDIENCE: &str = "api://AzureADTokenExchange";

/// Key Vault data-plane API version
pub const KEY_VAULT_API_VERSION: &str = "7.4";

/// OAuth scope for Key Vault data-plane calls
pub const KEY_VAULT_SCOPE: &str = "https://vault.azure.net/.default";

/// OAuth scope for Azure Resource Manager calls
pub const ARM_SCOPE: &str = "https://management.azure.com/.default";

/// ARM API version for federated identity credentials
pub const ARM_FEDERATION_API_VERSION: &str = "2023-01-31";

/// Default Azure Resource Manager endpoint
pub const DEFAULT_ARM_ENDPOINT: &str = "https://management.azure.com";
