//! # Azure Federated Identity Credentials
//!
//! ARM client for `Microsoft.ManagedIdentity/userAssignedIdentities/{name}/federatedIdentityCredentials`.
//! Replaces the manual `az identity federated-credential create` step.

use crate::constants::{ARM_FEDERATION_API_VERSION, ARM_SCOPE};
use crate::observability::metrics;
use crate::provider::azure::credential::access_token;
use crate::provider::{FederatedCredential, FederationApi, FederationError};
use async_trait::async_trait;
use azure_core::credentials::TokenCredential;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, Instrument};

#[derive(Serialize, Deserialize)]
struct CredentialResource {
    #[serde(default, skip_serializing)]
    name: Option<String>,
    properties: CredentialProperties,
}

#[derive(Serialize, Deserialize)]
struct CredentialProperties {
    issuer: String,
    subject: String,
    #[serde(default)]
    audiences: Vec<String>,
}

/// ARM-backed identity federation API
pub struct ArmFederation {
    http: reqwest::Client,
    credential: Arc<dyn TokenCredential>,
    endpoint: String,
}

impl std::fmt::Debug for ArmFederation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmFederation")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl ArmFederation {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        credential: Arc<dyn TokenCredential>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            http,
            credential,
            endpoint: endpoint.into(),
        }
    }

    fn credential_url(&self, identity_resource_id: &str, name: &str) -> String {
        format!(
            "{}/{}/federatedIdentityCredentials/{}?api-version={}",
            self.endpoint.trim_end_matches('/'),
            identity_resource_id.trim_matches('/'),
            name,
            ARM_FEDERATION_API_VERSION
        )
    }

    async fn bearer(&self) -> Result<String, FederationError> {
        access_token(self.credential.as_ref(), ARM_SCOPE)
            .await
            .map_err(|e| {
                if e.is_transient() {
                    FederationError::Unavailable(e.to_string())
                } else {
                    FederationError::Auth(e.to_string())
                }
            })
    }
}

fn classify_status(status: StatusCode, body: String) -> FederationError {
    let message = format!("HTTP {status}: {body}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FederationError::Auth(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::CONFLICT => {
            FederationError::Unavailable(message)
        }
        s if s.is_server_error() => FederationError::Unavailable(message),
        _ => FederationError::Rejected(message),
    }
}

#[async_trait]
impl FederationApi for ArmFederation {
    async fn get_credential(
        &self,
        identity_resource_id: &str,
        name: &str,
    ) -> Result<Option<FederatedCredential>, FederationError> {
        let span = tracing::debug_span!("azure.arm.federated_credential.get", credential.name = name);
        let start = Instant::now();

        async move {
            let token = self.bearer().await?;
            let response = self
                .http
                .get(self.credential_url(identity_resource_id, name))
                .bearer_auth(token)
                .send()
                .await
                .map_err(|e| FederationError::Unavailable(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                metrics::record_provider_operation("arm", "get", start.elapsed().as_secs_f64());
                return Ok(None);
            }
            if !status.is_success() {
                metrics::increment_provider_operation_errors("arm");
                let body = response.text().await.unwrap_or_default();
                return Err(classify_status(status, body));
            }

            let resource: CredentialResource = response
                .json()
                .await
                .map_err(|e| FederationError::Unavailable(format!("malformed ARM response: {e}")))?;
            metrics::record_provider_operation("arm", "get", start.elapsed().as_secs_f64());

            Ok(Some(FederatedCredential {
                name: resource.name.unwrap_or_else(|| name.to_string()),
                issuer: resource.properties.issuer,
                subject: resource.properties.subject,
                audiences: resource.properties.audiences,
            }))
        }
        .instrument(span)
        .await
    }

    async fn put_credential(
        &self,
        identity_resource_id: &str,
        credential: &FederatedCredential,
    ) -> Result<(), FederationError> {
        let span = tracing::info_span!(
            "azure.arm.federated_credential.put",
            credential.name = credential.name.as_str()
        );
        let start = Instant::now();

        async move {
            let token = self.bearer().await?;
            let body = CredentialResource {
                name: None,
                properties: CredentialProperties {
                    issuer: credential.issuer.clone(),
                    subject: credential.subject.clone(),
                    audiences: credential.audiences.clone(),
                },
            };

            let response = self
                .http
                .put(self.credential_url(identity_resource_id, &credential.name))
                .bearer_auth(token)
                .json(&body)
                .send()
                .await
                .map_err(|e| FederationError::Unavailable(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                metrics::increment_provider_operation_errors("arm");
                let body = response.text().await.unwrap_or_default();
                return Err(classify_status(status, body));
            }

            metrics::record_provider_operation("arm", "put", start.elapsed().as_secs_f64());
            info!(
                subject = credential.subject.as_str(),
                issuer = credential.issuer.as_str(),
                "Created federated identity credential"
            );
            Ok(())
        }
        .instrument(span)
        .await
    }
}
