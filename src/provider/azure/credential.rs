//! # Entra ID Credentials
//!
//! Access tokens for the controller's own Azure identity.
//!
//! Supports:
//! - Workload Identity (DEFAULT): selected when the workload identity webhook
//!   injected `AZURE_FEDERATED_TOKEN_FILE` into the controller pod
//! - Managed Identity: fallback for clusters without the webhook
//!
//! Token exchange and caching are handled by `azure_identity`. The REST
//! clients only ask for a bearer token per call.

use anyhow::{Context, Result};
use azure_core::credentials::{TokenCredential, TokenRequestOptions};
use azure_core::error::ErrorKind;
use azure_core::http::StatusCode;
use azure_identity::{ManagedIdentityCredential, WorkloadIdentityCredential};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Token acquisition errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Entra ID refused the credential (no matching federated credential, unknown client, ...)
    #[error("token request rejected: {0}")]
    Rejected(String),
    /// Entra ID could not be reached or answered with a server error
    #[error("token endpoint unavailable: {0}")]
    Unavailable(String),
}

impl CredentialError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Build the controller credential from the pod environment
///
/// # Errors
/// Returns an error if the selected credential cannot be constructed
/// (for example `AZURE_CLIENT_ID` or `AZURE_TENANT_ID` is missing).
pub fn from_env() -> Result<Arc<dyn TokenCredential>> {
    let credential: Arc<dyn TokenCredential> =
        if std::env::var_os("AZURE_FEDERATED_TOKEN_FILE").is_some() {
            info!("Using Azure Workload Identity authentication");
            WorkloadIdentityCredential::new(None)
                .context("Failed to create WorkloadIdentityCredential")?
        } else {
            info!("AZURE_FEDERATED_TOKEN_FILE not set, using Managed Identity");
            ManagedIdentityCredential::new(None)
                .context("Failed to create ManagedIdentityCredential")?
        };
    Ok(credential)
}

/// Bearer token for a single scope
///
/// # Errors
/// Returns a classified `CredentialError` when the token cannot be acquired.
pub async fn access_token(
    credential: &dyn TokenCredential,
    scope: &str,
) -> Result<String, CredentialError> {
    let options = Some(TokenRequestOptions::default());
    let token = credential
        .get_token(&[scope], options)
        .await
        .map_err(|e| classify_error(&e))?;
    Ok(token.token.secret().to_string())
}

/// Map an `azure_core` error onto retryable vs. fatal
///
/// Throttling, server errors and I/O failures are retried. Any other answer
/// from Entra ID means the identity itself is wrong.
#[must_use]
pub fn classify_error(error: &azure_core::Error) -> CredentialError {
    let message = error.to_string();
    match error.http_status() {
        Some(status) if status.is_server_error() || status == StatusCode::TooManyRequests => {
            CredentialError::Unavailable(message)
        }
        Some(_) => CredentialError::Rejected(message),
        None if matches!(error.kind(), ErrorKind::Io) => CredentialError::Unavailable(message),
        None => CredentialError::Rejected(message),
    }
}
