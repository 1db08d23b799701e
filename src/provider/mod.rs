//! # Provider Modules
//!
//! Seams to the remote systems the controller consumes.
//!
//! - `SecretSource` for versioned remote secret stores
//! - `FederationApi` for the identity federation API that trusts cluster
//!   service account tokens
//!
//! Azure implementations live in `azure`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

pub mod azure;

/// Identifies a remote secret
///
/// Immutable once resolved: a changed pinned version is a different reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub vault_name: String,
    pub secret_name: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl SecretRef {
    #[must_use]
    pub fn new(vault_name: impl Into<String>, secret_name: impl Into<String>) -> Self {
        Self {
            vault_name: vault_name.into(),
            secret_name: secret_name.into(),
            version: None,
        }
    }

    /// Pin the reference to a specific version
    #[must_use]
    pub fn pinned(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}/{}@{}", self.vault_name, self.secret_name, version),
            None => write!(f, "{}/{}", self.vault_name, self.secret_name),
        }
    }
}

/// A concrete version of a remote secret
///
/// Key Vault version ids are opaque, so ordering uses the creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretVersion {
    pub id: String,
    /// Creation time in unix seconds
    pub created: i64,
}

impl SecretVersion {
    #[must_use]
    pub fn new(id: impl Into<String>, created: i64) -> Self {
        Self {
            id: id.into(),
            created,
        }
    }

    /// True when `self` is a different version created before `other`
    #[must_use]
    pub fn is_behind(&self, other: &SecretVersion) -> bool {
        self.id != other.id && self.created < other.created
    }
}

/// Secret material, wiped from memory on drop and never printed
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(Zeroizing<String>);

impl SecretValue {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

/// Result of a successful fetch
#[derive(Debug, Clone)]
pub struct FetchedSecret {
    pub reference: SecretRef,
    pub version: SecretVersion,
    pub value: SecretValue,
}

/// Errors returned by a `SecretSource`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Transient: network, throttling, server errors, timeouts, missing secrets
    #[error("failed to fetch secret {reference}: {message}")]
    Fetch { reference: String, message: String },
    /// Fatal: the controller identity is not allowed to read the secret
    #[error("authentication failed for secret {reference}: {message}")]
    Auth { reference: String, message: String },
}

impl SourceError {
    #[must_use]
    pub fn fetch(reference: &SecretRef, message: impl Into<String>) -> Self {
        Self::Fetch {
            reference: reference.to_string(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn auth(reference: &SecretRef, message: impl Into<String>) -> Self {
        Self::Auth {
            reference: reference.to_string(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Fetch { .. })
    }
}

/// Remote secret store, fetch-by-name, versioned
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Fetch the referenced version, or the latest when the reference is not pinned
    async fn fetch(&self, reference: &SecretRef) -> Result<FetchedSecret, SourceError>;
}

/// A federated identity credential trusting one service account token subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedCredential {
    pub name: String,
    pub issuer: String,
    pub subject: String,
    pub audiences: Vec<String>,
}

/// Errors returned by a `FederationApi`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FederationError {
    #[error("identity federation API rejected credentials: {0}")]
    Auth(String),
    #[error("identity federation API unavailable: {0}")]
    Unavailable(String),
    #[error("identity federation API rejected request: {0}")]
    Rejected(String),
}

impl FederationError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Identity federation API (federated credentials on a managed identity)
#[async_trait]
pub trait FederationApi: Send + Sync {
    async fn get_credential(
        &self,
        identity_resource_id: &str,
        name: &str,
    ) -> Result<Option<FederatedCredential>, FederationError>;

    async fn put_credential(
        &self,
        identity_resource_id: &str,
        credential: &FederatedCredential,
    ) -> Result<(), FederationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_ref_display() {
        let latest = SecretRef::new("solr-kv", "admin-password");
        assert_eq!(latest.to_string(), "solr-kv/admin-password");
        let pinned = latest.pinned("abc123");
        assert_eq!(pinned.to_string(), "solr-kv/admin-password@abc123");
    }

    #[test]
    fn test_version_is_behind() {
        let old = SecretVersion::new("v1", 100);
        let new = SecretVersion::new("v2", 200);
        assert!(old.is_behind(&new));
        assert!(!new.is_behind(&old));
        assert!(!new.is_behind(&new.clone()));
        // Same creation time is not considered a regression
        assert!(!SecretVersion::new("v3", 200).is_behind(&new));
    }

    #[test]
    fn test_secret_value_debug_is_redacted() {
        let value = SecretValue::new("hunter2");
        assert_eq!(format!("{value:?}"), "SecretValue(***)");
        assert_eq!(value.expose(), "hunter2");
    }

    #[test]
    fn test_error_classification() {
        let reference = SecretRef::new("kv", "s");
        assert!(SourceError::fetch(&reference, "503").is_transient());
        assert!(!SourceError::auth(&reference, "403").is_transient());
        assert!(FederationError::Unavailable("x".into()).is_transient());
        assert!(!FederationError::Auth("x".into()).is_transient());
        assert!(!FederationError::Rejected("x".into()).is_transient());
    }
}
