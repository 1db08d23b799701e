//! # Identity Binder
//!
//! Federates a namespace/service-account pair with an Azure managed identity:
//!
//! 1. Ensures a federated identity credential trusting
//!    `system:serviceaccount:<namespace>:<serviceAccount>` from the cluster issuer
//!    (only when the managed identity's ARM resource ID is known)
//! 2. Annotates the service account with `azure.workload.identity/client-id`
//!    so the workload identity webhook injects the token exchange
//!
//! Everything is read before it is written, so binding the same inputs twice
//! performs no writes. A different existing value is a conflict, never overwritten.

use crate::cluster::{ClusterError, ServiceAccountStore};
use crate::constants::{
    FEDERATED_TOKEN_AUDIENCE, WORKLOAD_IDENTITY_CLIENT_ID_ANNOTATION,
    WORKLOAD_IDENTITY_TENANT_ID_ANNOTATION,
};
use crate::crd::IdentityBindingStatus;
use crate::observability::metrics;
use crate::provider::{FederatedCredential, FederationApi, FederationError};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Federated credential names are limited to 120 characters by ARM
const MAX_CREDENTIAL_NAME_LEN: usize = 120;

/// An established workload identity binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityBinding {
    pub namespace: String,
    pub service_account: String,
    pub client_id: String,
    pub issuer_url: String,
}

impl From<&IdentityBinding> for IdentityBindingStatus {
    fn from(binding: &IdentityBinding) -> Self {
        Self {
            namespace: binding.namespace.clone(),
            service_account: binding.service_account.clone(),
            client_id: binding.client_id.clone(),
            issuer_url: binding.issuer_url.clone(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("identity binding conflict for {namespace}/{service_account}: {reason}")]
    Conflict {
        namespace: String,
        service_account: String,
        reason: String,
    },
    #[error("identity federation not authorized: {0}")]
    Auth(String),
    #[error("identity federation unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl BindingError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Cluster(e) => e.is_transient(),
            Self::Conflict { .. } | Self::Auth(_) => false,
        }
    }
}

impl From<FederationError> for BindingError {
    fn from(error: FederationError) -> Self {
        match error {
            FederationError::Auth(message) => Self::Auth(message),
            FederationError::Unavailable(message) => Self::Unavailable(message),
            // A rejected request will be rejected again until the inputs change
            FederationError::Rejected(message) => Self::Auth(message),
        }
    }
}

/// Identity to bind, resolved from the resource and controller defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinderSettings {
    pub client_id: String,
    pub tenant_id: Option<String>,
    pub issuer_url: String,
    pub identity_resource_id: Option<String>,
}

/// `kvsync-<namespace>-<serviceAccount>`, restricted to ARM's `[A-Za-z0-9-_]`
#[must_use]
pub fn federated_credential_name(namespace: &str, service_account: &str) -> String {
    let raw = format!("kvsync-{namespace}-{service_account}");
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .take(MAX_CREDENTIAL_NAME_LEN)
        .collect()
}

#[must_use]
pub fn service_account_subject(namespace: &str, service_account: &str) -> String {
    format!("system:serviceaccount:{namespace}:{service_account}")
}

pub struct IdentityBinder {
    federation: Arc<dyn FederationApi>,
    service_accounts: Arc<dyn ServiceAccountStore>,
    settings: BinderSettings,
    call_timeout: Duration,
}

impl std::fmt::Debug for IdentityBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityBinder")
            .field("settings", &self.settings)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl IdentityBinder {
    #[must_use]
    pub fn new(
        federation: Arc<dyn FederationApi>,
        service_accounts: Arc<dyn ServiceAccountStore>,
        settings: BinderSettings,
        call_timeout: Duration,
    ) -> Self {
        Self {
            federation,
            service_accounts,
            settings,
            call_timeout,
        }
    }

    /// Bind the service account to the configured managed identity
    ///
    /// # Errors
    /// - `Conflict` if an existing credential or annotation disagrees
    /// - `Auth` if the federation API refuses the controller
    /// - `Unavailable` / `Cluster` on transient failures and timeouts
    pub async fn bind(
        &self,
        namespace: &str,
        service_account: &str,
    ) -> Result<IdentityBinding, BindingError> {
        let mut changed = false;

        if let Some(identity_resource_id) = &self.settings.identity_resource_id {
            changed |= self
                .ensure_federated_credential(identity_resource_id, namespace, service_account)
                .await?;
        }
        changed |= self
            .ensure_service_account(namespace, service_account)
            .await?;

        metrics::increment_identity_bindings(if changed { "applied" } else { "unchanged" });
        if changed {
            info!(
                namespace,
                service_account,
                client_id = self.settings.client_id.as_str(),
                "Bound service account to managed identity"
            );
        } else {
            debug!(namespace, service_account, "Identity binding already in place");
        }

        Ok(IdentityBinding {
            namespace: namespace.to_string(),
            service_account: service_account.to_string(),
            client_id: self.settings.client_id.clone(),
            issuer_url: self.settings.issuer_url.clone(),
        })
    }

    async fn ensure_federated_credential(
        &self,
        identity_resource_id: &str,
        namespace: &str,
        service_account: &str,
    ) -> Result<bool, BindingError> {
        let desired = FederatedCredential {
            name: federated_credential_name(namespace, service_account),
            issuer: self.settings.issuer_url.clone(),
            subject: service_account_subject(namespace, service_account),
            audiences: vec![FEDERATED_TOKEN_AUDIENCE.to_string()],
        };

        let existing = self
            .federation_call(
                self.federation
                    .get_credential(identity_resource_id, &desired.name),
            )
            .await?;

        if let Some(existing) = existing {
            if existing.issuer == desired.issuer && existing.subject == desired.subject {
                return Ok(false);
            }
            return Err(BindingError::Conflict {
                namespace: namespace.to_string(),
                service_account: service_account.to_string(),
                reason: format!(
                    "federated credential {} trusts subject {} from issuer {}",
                    existing.name, existing.subject, existing.issuer
                ),
            });
        }

        self.federation_call(
            self.federation
                .put_credential(identity_resource_id, &desired),
        )
        .await?;
        Ok(true)
    }

    async fn ensure_service_account(
        &self,
        namespace: &str,
        service_account: &str,
    ) -> Result<bool, BindingError> {
        let mut desired = BTreeMap::from([(
            WORKLOAD_IDENTITY_CLIENT_ID_ANNOTATION.to_string(),
            self.settings.client_id.clone(),
        )]);
        if let Some(tenant_id) = &self.settings.tenant_id {
            desired.insert(
                WORKLOAD_IDENTITY_TENANT_ID_ANNOTATION.to_string(),
                tenant_id.clone(),
            );
        }

        let object = format!("serviceaccount {namespace}/{service_account}");
        let current = self
            .cluster_call(
                &object,
                self.service_accounts.annotations(namespace, service_account),
            )
            .await?
            .unwrap_or_default();

        let mut missing = BTreeMap::new();
        for (key, value) in &desired {
            match current.get(key) {
                Some(existing) if existing == value => {}
                Some(existing) => {
                    return Err(BindingError::Conflict {
                        namespace: namespace.to_string(),
                        service_account: service_account.to_string(),
                        reason: format!("annotation {key} is already set to {existing}"),
                    });
                }
                None => {
                    missing.insert(key.clone(), value.clone());
                }
            }
        }

        if missing.is_empty() {
            return Ok(false);
        }

        self.cluster_call(
            &object,
            self.service_accounts
                .annotate(namespace, service_account, &desired),
        )
        .await?;
        Ok(true)
    }

    async fn federation_call<T>(
        &self,
        call: impl Future<Output = Result<T, FederationError>>,
    ) -> Result<T, BindingError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result.map_err(BindingError::from),
            Err(_elapsed) => Err(BindingError::Unavailable(format!(
                "identity federation API timed out after {:?}",
                self.call_timeout
            ))),
        }
    }

    async fn cluster_call<T>(
        &self,
        object: &str,
        call: impl Future<Output = Result<T, ClusterError>>,
    ) -> Result<T, BindingError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result.map_err(BindingError::from),
            Err(_elapsed) => Err(BindingError::Cluster(ClusterError::Request {
                object: object.to_string(),
                message: format!("timed out after {:?}", self.call_timeout),
            })),
        }
    }
}
