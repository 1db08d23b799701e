//! # Validation
//!
//! Validates a `KeyVaultSecretSync` before anything is written.
//! Failures are fatal: the resource is marked Failed until its spec changes.

use crate::crd::KeyVaultSecretSyncSpec;
use regex::Regex;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is invalid: {reason}")]
    Field { field: String, reason: String },
    #[error("localName '{0}' is used by more than one secret")]
    DuplicateLocalName(String),
}

impl ValidationError {
    fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Field {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

fn regex(pattern: &str) -> Result<Regex, ValidationError> {
    Regex::new(pattern).map_err(|e| ValidationError::field("pattern", e.to_string()))
}

/// Parse Kubernetes duration string into std::time::Duration
/// Supports formats: "30s", "1m", "5m", "1h", "2h", "1d"
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Duration, ValidationError> {
    let trimmed = duration_str.trim().to_lowercase();
    let invalid = |reason: String| ValidationError::field("refreshInterval", reason);

    let duration_regex = regex(r"^(?P<number>\d+)(?P<unit>[smhd])$")?;
    let captures = duration_regex.captures(&trimmed).ok_or_else(|| {
        invalid(format!(
            "'{trimmed}' is not a duration; expected <number><unit> (e.g. '30s', '5m', '1h')"
        ))
    })?;

    let number: u64 = captures["number"]
        .parse()
        .map_err(|e| invalid(format!("'{trimmed}': {e}")))?;
    if number == 0 {
        return Err(invalid(format!("'{trimmed}' must be greater than 0")));
    }

    let seconds = match &captures["unit"] {
        "s" => number,
        "m" => number.saturating_mul(60),
        "h" => number.saturating_mul(3_600),
        _ => number.saturating_mul(86_400),
    };
    Ok(Duration::from_secs(seconds))
}

/// Parse the refresh interval and enforce the minimum
pub fn refresh_interval(spec: &KeyVaultSecretSyncSpec, min_secs: u64) -> Result<Duration, ValidationError> {
    let interval = parse_kubernetes_duration(&spec.refresh_interval)?;
    if interval.as_secs() < min_secs {
        return Err(ValidationError::field(
            "refreshInterval",
            format!(
                "'{}' is below the minimum of {min_secs}s",
                spec.refresh_interval
            ),
        ));
    }
    Ok(interval)
}

/// Validate Kubernetes resource name (RFC 1123 subdomain, 1-253 characters)
pub fn validate_kubernetes_name(name: &str, field: &str) -> Result<(), ValidationError> {
    if name.is_empty() || name.len() > 253 {
        return Err(ValidationError::field(
            field,
            format!("'{name}' must be 1-253 characters"),
        ));
    }
    let name_regex =
        regex(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")?;
    if !name_regex.is_match(name) {
        return Err(ValidationError::field(
            field,
            format!("'{name}' must be lowercase alphanumeric, '-' or '.', and start and end with an alphanumeric"),
        ));
    }
    Ok(())
}

/// Key Vault secret names: 1-127 characters, alphanumerics and hyphens
pub fn validate_key_vault_secret_name(name: &str, field: &str) -> Result<(), ValidationError> {
    let name_regex = regex(r"^[0-9a-zA-Z-]{1,127}$")?;
    if !name_regex.is_match(name) {
        return Err(ValidationError::field(
            field,
            format!("'{name}' is not a valid Key Vault secret name (1-127 alphanumerics or '-')"),
        ));
    }
    Ok(())
}

/// Secret data keys: `[-._a-zA-Z0-9]+`, at most 253 characters
pub fn validate_data_key(key: &str, field: &str) -> Result<(), ValidationError> {
    let key_regex = regex(r"^[-._a-zA-Z0-9]{1,253}$")?;
    if !key_regex.is_match(key) {
        return Err(ValidationError::field(
            field,
            format!("'{key}' is not a valid Secret data key"),
        ));
    }
    Ok(())
}

/// Validate the whole spec
///
/// `default_issuer` is the controller-wide OIDC issuer used when the resource sets none.
pub fn validate_spec(
    spec: &KeyVaultSecretSyncSpec,
    min_refresh_secs: u64,
    default_issuer: Option<&str>,
) -> Result<(), ValidationError> {
    if spec.vault_name.trim().is_empty() {
        return Err(ValidationError::field("vaultName", "must not be empty"));
    }
    refresh_interval(spec, min_refresh_secs)?;

    let identity = &spec.identity;
    validate_kubernetes_name(&identity.service_account, "identity.serviceAccount")?;
    if identity.client_id.trim().is_empty() {
        return Err(ValidationError::field("identity.clientId", "must not be empty"));
    }
    let issuer = identity.issuer_url.as_deref().or(default_issuer);
    match issuer {
        Some(url) if url.starts_with("https://") => {}
        Some(url) => {
            return Err(ValidationError::field(
                "identity.issuerUrl",
                format!("'{url}' must be an https URL"),
            ))
        }
        None => {
            return Err(ValidationError::field(
                "identity.issuerUrl",
                "not set and the controller has no default OIDC issuer",
            ))
        }
    }
    if let Some(resource_id) = &identity.identity_resource_id {
        if !resource_id.to_lowercase().starts_with("/subscriptions/") {
            return Err(ValidationError::field(
                "identity.identityResourceId",
                format!("'{resource_id}' is not an ARM resource ID"),
            ));
        }
    }

    if spec.secrets.is_empty() {
        return Err(ValidationError::field("secrets", "at least one secret is required"));
    }
    let mut local_names = HashSet::new();
    for (index, secret) in spec.secrets.iter().enumerate() {
        validate_key_vault_secret_name(&secret.secret_name, &format!("secrets[{index}].secretName"))?;
        validate_kubernetes_name(&secret.local_name, &format!("secrets[{index}].localName"))?;
        validate_data_key(secret.data_key(), &format!("secrets[{index}].key"))?;
        if let Some(version) = &secret.version {
            if version.trim().is_empty() || version.contains('/') {
                return Err(ValidationError::field(
                    format!("secrets[{index}].version"),
                    format!("'{version}' is not a Key Vault version id"),
                ));
            }
        }
        if !local_names.insert(secret.local_name.as_str()) {
            return Err(ValidationError::DuplicateLocalName(secret.local_name.clone()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{IdentityConfig, SecretMapping};

    fn spec() -> KeyVaultSecretSyncSpec {
        KeyVaultSecretSyncSpec {
            vault_name: "solr-kv".into(),
            identity: IdentityConfig {
                service_account: "solr".into(),
                client_id: "11111111-2222-3333-4444-555555555555".into(),
                tenant_id: None,
                issuer_url: Some("https://oidc.prod-aks.azure.com/tenant/".into()),
                identity_resource_id: None,
            },
            secrets: vec![SecretMapping {
                secret_name: "solr-admin-password".into(),
                version: None,
                local_name: "solr-basic-auth".into(),
                key: Some("password".into()),
            }],
            refresh_interval: "5m".into(),
            suspend: false,
        }
    }

    #[test]
    fn test_parse_kubernetes_duration() {
        assert_eq!(parse_kubernetes_duration("30s").ok(), Some(Duration::from_secs(30)));
        assert_eq!(parse_kubernetes_duration("5m").ok(), Some(Duration::from_secs(300)));
        assert_eq!(parse_kubernetes_duration(" 1H ").ok(), Some(Duration::from_secs(3600)));
        assert_eq!(parse_kubernetes_duration("1d").ok(), Some(Duration::from_secs(86400)));
        assert!(parse_kubernetes_duration("0s").is_err());
        assert!(parse_kubernetes_duration("5").is_err());
        assert!(parse_kubernetes_duration("1m30s").is_err());
        assert!(parse_kubernetes_duration("").is_err());
    }

    #[test]
    fn test_valid_spec() {
        assert_eq!(validate_spec(&spec(), 30, None), Ok(()));
    }

    #[test]
    fn test_refresh_interval_minimum() {
        let mut s = spec();
        s.refresh_interval = "10s".into();
        assert!(validate_spec(&s, 30, None).is_err());
        s.refresh_interval = "30s".into();
        assert_eq!(refresh_interval(&s, 30).ok(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_duplicate_local_names_rejected() {
        let mut s = spec();
        let mut second = s.secrets[0].clone();
        second.secret_name = "solr-reader-password".into();
        s.secrets.push(second);
        assert_eq!(
            validate_spec(&s, 30, None),
            Err(ValidationError::DuplicateLocalName("solr-basic-auth".into()))
        );
    }

    #[test]
    fn test_issuer_falls_back_to_default() {
        let mut s = spec();
        s.identity.issuer_url = None;
        assert!(validate_spec(&s, 30, None).is_err());
        assert_eq!(
            validate_spec(&s, 30, Some("https://issuer.example/")),
            Ok(())
        );
    }

    #[test]
    fn test_names_and_keys() {
        assert!(validate_key_vault_secret_name("solr_admin", "f").is_err());
        assert!(validate_key_vault_secret_name(&"a".repeat(128), "f").is_err());
        assert!(validate_kubernetes_name("Solr", "f").is_err());
        assert!(validate_data_key("security.json", "f").is_ok());
        assert!(validate_data_key("a/b", "f").is_err());

        let mut s = spec();
        s.identity.identity_resource_id = Some("solr-identity".into());
        assert!(validate_spec(&s, 30, None).is_err());
    }
}
