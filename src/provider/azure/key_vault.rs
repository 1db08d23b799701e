//! # Azure Key Vault Client
//!
//! Reads secrets from the Key Vault Secrets REST API.
//!
//! `GET {vault}/secrets/{name}/{version}?api-version=7.4` returns the value,
//! the versioned id (`.../secrets/{name}/{version}`) and attributes whose
//! `created` timestamp orders versions.

use crate::constants::{KEY_VAULT_API_VERSION, KEY_VAULT_SCOPE};
use crate::observability::metrics;
use crate::provider::azure::credential::access_token;
use crate::provider::{FetchedSecret, SecretRef, SecretSource, SecretValue, SecretVersion, SourceError};
use async_trait::async_trait;
use azure_core::credentials::TokenCredential;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, Instrument};

#[derive(Deserialize)]
struct SecretBundle {
    #[serde(default)]
    value: Option<String>,
    id: String,
    #[serde(default)]
    attributes: Option<SecretAttributes>,
}

#[derive(Deserialize)]
struct SecretAttributes {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    created: Option<i64>,
}

#[derive(Deserialize)]
struct KeyVaultErrorResponse {
    error: KeyVaultErrorBody,
}

#[derive(Deserialize)]
struct KeyVaultErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Azure Key Vault secret source
pub struct AzureKeyVault {
    http: reqwest::Client,
    credential: Arc<dyn TokenCredential>,
}

impl std::fmt::Debug for AzureKeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureKeyVault").finish_non_exhaustive()
    }
}

impl AzureKeyVault {
    #[must_use]
    pub fn new(http: reqwest::Client, credential: Arc<dyn TokenCredential>) -> Self {
        Self { http, credential }
    }
}

/// Vault base URL for a vault name
///
/// Accepts a bare vault name or a full URL (used for sovereign clouds and tests).
#[must_use]
pub fn vault_url(vault_name: &str) -> String {
    if vault_name.starts_with("https://") || vault_name.starts_with("http://") {
        if vault_name.ends_with('/') {
            vault_name.to_string()
        } else {
            format!("{vault_name}/")
        }
    } else {
        format!("https://{vault_name}.vault.azure.net/")
    }
}

/// Request URL for a secret reference
#[must_use]
pub fn secret_url(reference: &SecretRef) -> String {
    let base = vault_url(&reference.vault_name);
    match &reference.version {
        Some(version) => format!(
            "{base}secrets/{}/{version}?api-version={KEY_VAULT_API_VERSION}",
            reference.secret_name
        ),
        None => format!(
            "{base}secrets/{}?api-version={KEY_VAULT_API_VERSION}",
            reference.secret_name
        ),
    }
}

/// Map a non-success Key Vault response to a `SourceError`
///
/// 401/403 are authorization failures, except `SecretDisabled` which is an
/// operator-side state that may be reverted. Everything else is retried.
#[must_use]
pub fn classify_response(reference: &SecretRef, status: StatusCode, body: &str) -> SourceError {
    let (code, message) = match serde_json::from_str::<KeyVaultErrorResponse>(body) {
        Ok(parsed) => (parsed.error.code, parsed.error.message),
        Err(_) => (String::new(), body.to_string()),
    };
    let detail = if code.is_empty() {
        format!("HTTP {status}: {message}")
    } else {
        format!("HTTP {status} {code}: {message}")
    };

    match status {
        StatusCode::UNAUTHORIZED => SourceError::auth(reference, detail),
        StatusCode::FORBIDDEN if code != "SecretDisabled" => SourceError::auth(reference, detail),
        _ => SourceError::fetch(reference, detail),
    }
}

#[async_trait]
impl SecretSource for AzureKeyVault {
    async fn fetch(&self, reference: &SecretRef) -> Result<FetchedSecret, SourceError> {
        let span = tracing::debug_span!(
            "azure.keyvault.secret.get",
            secret.name = reference.secret_name.as_str(),
            vault.name = reference.vault_name.as_str()
        );
        let start = Instant::now();

        async move {
            let token = access_token(self.credential.as_ref(), KEY_VAULT_SCOPE)
                .await
                .map_err(|e| {
                    metrics::increment_provider_operation_errors("keyvault");
                    if e.is_transient() {
                        SourceError::fetch(reference, e.to_string())
                    } else {
                        SourceError::auth(reference, e.to_string())
                    }
                })?;

            let response = self
                .http
                .get(secret_url(reference))
                .bearer_auth(token)
                .send()
                .await
                .map_err(|e| {
                    metrics::increment_provider_operation_errors("keyvault");
                    SourceError::fetch(reference, e.to_string())
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                metrics::increment_provider_operation_errors("keyvault");
                return Err(classify_response(reference, status, &body));
            }

            let bundle: SecretBundle = response.json().await.map_err(|e| {
                metrics::increment_provider_operation_errors("keyvault");
                SourceError::fetch(reference, format!("malformed secret bundle: {e}"))
            })?;

            let attributes = bundle.attributes.unwrap_or(SecretAttributes {
                enabled: None,
                created: None,
            });
            if attributes.enabled == Some(false) {
                return Err(SourceError::fetch(reference, "secret version is disabled"));
            }
            let value = bundle
                .value
                .ok_or_else(|| SourceError::fetch(reference, "secret bundle has no value"))?;
            let version_id = bundle
                .id
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string();

            metrics::record_provider_operation("keyvault", "get", start.elapsed().as_secs_f64());
            debug!(
                secret.version = version_id.as_str(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Fetched Key Vault secret"
            );

            Ok::<_, SourceError>(FetchedSecret {
                reference: reference.clone(),
                version: SecretVersion::new(version_id, attributes.created.unwrap_or_default()),
                value: SecretValue::new(value),
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_azure_vault_url_construction() {
        assert_eq!(vault_url("my-vault"), "https://my-vault.vault.azure.net/");
        assert_eq!(
            vault_url("https://custom-vault.vault.azure.net/"),
            "https://custom-vault.vault.azure.net/"
        );
        assert_eq!(vault_url("http://127.0.0.1:8200"), "http://127.0.0.1:8200/");
    }

    #[test]
    fn test_secret_url_latest_and_pinned() {
        let latest = SecretRef::new("solr-kv", "admin-password");
        assert_eq!(
            secret_url(&latest),
            "https://solr-kv.vault.azure.net/secrets/admin-password?api-version=7.4"
        );
        let pinned = latest.pinned("0123abcd");
        assert_eq!(
            secret_url(&pinned),
            "https://solr-kv.vault.azure.net/secrets/admin-password/0123abcd?api-version=7.4"
        );
    }

    #[test]
    fn test_classify_forbidden_is_auth() {
        let reference = SecretRef::new("kv", "s");
        let body = r#"{"error":{"code":"Forbidden","message":"Caller is not authorized"}}"#;
        let err = classify_response(&reference, StatusCode::FORBIDDEN, body);
        assert!(matches!(err, SourceError::Auth { .. }));
        assert!(err.to_string().contains("Caller is not authorized"));
    }

    #[test]
    fn test_classify_disabled_secret_is_fetch() {
        let reference = SecretRef::new("kv", "s");
        let body = r#"{"error":{"code":"SecretDisabled","message":"Operation get is not allowed on a disabled secret."}}"#;
        let err = classify_response(&reference, StatusCode::FORBIDDEN, body);
        assert!(err.is_transient());
    }

    #[test]
    fn test_classify_not_found_and_throttling_are_transient() {
        let reference = SecretRef::new("kv", "s");
        for status in [
            StatusCode::NOT_FOUND,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert!(classify_response(&reference, status, "").is_transient());
        }
        assert!(!classify_response(&reference, StatusCode::UNAUTHORIZED, "nope").is_transient());
    }
}
