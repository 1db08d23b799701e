//! # Secret Syncer
//!
//! Fetches one Key Vault secret and materializes it as a local `Secret`.
//!
//! Fetch failures are retried with exponential backoff inside a single sync;
//! authorization failures are returned immediately. The version and content
//! hash recorded on the local object make re-syncing an unchanged secret a
//! no-op, and a latest-version read older than the recorded one is never
//! written. Pinned versions are written as asked, including rollbacks.

use crate::cluster::{ClusterError, LocalSecretState, SecretMaterial, SecretSink};
use crate::config::ControllerConfig;
use crate::constants::{
    CONTENT_HASH_ANNOTATION, OWNER_LABEL, SOURCE_ANNOTATION, SYNCED_AT_ANNOTATION,
    VERSION_ANNOTATION, VERSION_CREATED_ANNOTATION,
};
use crate::controller::backoff::ExponentialBackoff;
use crate::observability::metrics;
use crate::provider::{FetchedSecret, SecretRef, SecretSource, SecretVersion, SourceError};
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One remote secret to materialize under `namespace/local_name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub reference: SecretRef,
    pub namespace: String,
    pub local_name: String,
    pub key: String,
}

/// A secret as last materialized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedSecret {
    pub reference: SecretRef,
    pub local_name: String,
    pub last_synced_version: SecretVersion,
    pub last_synced_at: DateTime<Utc>,
}

/// Result of a sync, `written` is false when the local object was already current
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub secret: SyncedSecret,
    pub written: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceError),
    /// The local name is taken by an object this resource does not own
    #[error("secret {namespace}/{name} is not owned by {owner}; refusing to overwrite it")]
    LocalNameConflict {
        namespace: String,
        name: String,
        owner: String,
    },
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error("sync of {reference} cancelled")]
    Cancelled { reference: String },
}

impl SyncError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Source(e) => e.is_transient(),
            Self::Cluster(e) => e.is_transient(),
            Self::LocalNameConflict { .. } => false,
            Self::Cancelled { .. } => true,
        }
    }
}

/// Retry and timeout settings for a sync
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub max_attempts: u32,
    pub backoff_start: Duration,
    pub backoff_max: Duration,
    pub call_timeout: Duration,
}

impl SyncSettings {
    #[must_use]
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            max_attempts: config.fetch_max_attempts.max(1),
            backoff_start: config.fetch_backoff_start(),
            backoff_max: config.fetch_backoff_max(),
            call_timeout: config.external_call_timeout(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_config(&ControllerConfig::default())
    }
}

/// Identity stamped on every materialized secret
#[derive(Debug, Clone)]
pub struct SecretOwner {
    /// Value of the owner label
    pub name: String,
    /// Owner reference for garbage collection
    pub reference: Option<OwnerReference>,
}

/// SHA-256 over the data key and value, hex encoded
#[must_use]
pub fn content_hash(key: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update([0u8]);
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `vault/secret` without the version, recorded in the source annotation
fn source_of(reference: &SecretRef) -> String {
    format!("{}/{}", reference.vault_name, reference.secret_name)
}

/// Version recorded on an existing local object, if it came from the same remote secret
fn recorded_version(state: &LocalSecretState, reference: &SecretRef) -> Option<SecretVersion> {
    if state.annotations.get(SOURCE_ANNOTATION)? != &source_of(reference) {
        return None;
    }
    let id = state.annotations.get(VERSION_ANNOTATION)?;
    let created = state
        .annotations
        .get(VERSION_CREATED_ANNOTATION)
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or_default();
    Some(SecretVersion::new(id.clone(), created))
}

fn recorded_synced_at(state: &LocalSecretState) -> Option<DateTime<Utc>> {
    state
        .annotations
        .get(SYNCED_AT_ANNOTATION)
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
}

pub struct SecretSyncer {
    source: Arc<dyn SecretSource>,
    sink: Arc<dyn SecretSink>,
    owner: SecretOwner,
    settings: SyncSettings,
    cancel: CancellationToken,
}

impl std::fmt::Debug for SecretSyncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretSyncer")
            .field("owner", &self.owner)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SecretSyncer {
    #[must_use]
    pub fn new(
        source: Arc<dyn SecretSource>,
        sink: Arc<dyn SecretSink>,
        owner: SecretOwner,
        settings: SyncSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            sink,
            owner,
            settings,
            cancel,
        }
    }

    /// Fetch the referenced secret and write it locally if it changed
    ///
    /// # Errors
    /// - `Source(Fetch)` once all fetch attempts failed
    /// - `Source(Auth)` immediately on authorization failure
    /// - `LocalNameConflict` if the local object belongs to someone else
    /// - `Cluster` if reading or writing the local object failed
    /// - `Cancelled` if the resource was deleted mid-sync
    pub async fn sync(&self, request: &SyncRequest) -> Result<SyncOutcome, SyncError> {
        let fetched = self.fetch_with_retry(&request.reference).await?;

        let object = format!("secret {}/{}", request.namespace, request.local_name);
        let current = self
            .bounded(&object, self.sink.current(&request.namespace, &request.local_name))
            .await?;

        if let Some(state) = &current {
            if state.labels.get(OWNER_LABEL) != Some(&self.owner.name) {
                return Err(SyncError::LocalNameConflict {
                    namespace: request.namespace.clone(),
                    name: request.local_name.clone(),
                    owner: self.owner.name.clone(),
                });
            }
        }

        let hash = content_hash(&request.key, fetched.value.expose());
        let recorded = current
            .as_ref()
            .and_then(|state| recorded_version(state, &request.reference));

        if let (Some(state), Some(recorded)) = (&current, recorded) {
            let previous = |version: SecretVersion| SyncedSecret {
                reference: request.reference.clone(),
                local_name: request.local_name.clone(),
                last_synced_version: version,
                last_synced_at: recorded_synced_at(state).unwrap_or_else(Utc::now),
            };

            // A pin is explicit, so re-pinning to an older version rolls back
            let follows_latest = request.reference.version.is_none();
            if follows_latest && fetched.version.is_behind(&recorded) {
                metrics::increment_secrets_stale();
                warn!(
                    secret = %request.reference,
                    local_name = request.local_name.as_str(),
                    fetched_version = fetched.version.id.as_str(),
                    recorded_version = recorded.id.as_str(),
                    "Fetched version is older than the materialized one, keeping local secret"
                );
                return Ok(SyncOutcome {
                    secret: previous(recorded),
                    written: false,
                });
            }

            let recorded_hash = state.annotations.get(CONTENT_HASH_ANNOTATION);
            if recorded.id == fetched.version.id && recorded_hash == Some(&hash) {
                metrics::increment_secrets_unchanged();
                debug!(
                    secret = %request.reference,
                    local_name = request.local_name.as_str(),
                    "Local secret already current"
                );
                return Ok(SyncOutcome {
                    secret: previous(recorded),
                    written: false,
                });
            }
        }

        let synced_at = Utc::now();
        let material = self.material(request, &fetched, &hash, synced_at);
        self.bounded(&object, self.sink.write(&material)).await?;
        metrics::increment_secrets_written();

        info!(
            secret = %request.reference,
            namespace = request.namespace.as_str(),
            local_name = request.local_name.as_str(),
            version = fetched.version.id.as_str(),
            "Materialized Key Vault secret"
        );

        Ok(SyncOutcome {
            secret: SyncedSecret {
                reference: request.reference.clone(),
                local_name: request.local_name.clone(),
                last_synced_version: fetched.version,
                last_synced_at: synced_at,
            },
            written: true,
        })
    }

    async fn fetch_with_retry(&self, reference: &SecretRef) -> Result<FetchedSecret, SyncError> {
        let cancelled = || SyncError::Cancelled {
            reference: reference.to_string(),
        };
        let mut backoff =
            ExponentialBackoff::new(self.settings.backoff_start, self.settings.backoff_max);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(cancelled()),
                result = tokio::time::timeout(self.settings.call_timeout, self.source.fetch(reference)) => result,
            };

            let error = match result {
                Ok(Ok(fetched)) => return Ok(fetched),
                Ok(Err(e)) if !e.is_transient() => return Err(e.into()),
                Ok(Err(e)) => e,
                Err(_elapsed) => SourceError::fetch(
                    reference,
                    format!("timed out after {:?}", self.settings.call_timeout),
                ),
            };

            if attempt >= self.settings.max_attempts {
                return Err(error.into());
            }

            let delay = backoff.next_delay();
            metrics::increment_fetch_retries();
            warn!(
                secret = %reference,
                attempt,
                max_attempts = self.settings.max_attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %error,
                "Fetch failed, retrying"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(cancelled()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Apply the call timeout to a cluster request
    async fn bounded<T>(
        &self,
        object: &str,
        request: impl Future<Output = Result<T, ClusterError>>,
    ) -> Result<T, ClusterError> {
        match tokio::time::timeout(self.settings.call_timeout, request).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ClusterError::Request {
                object: object.to_string(),
                message: format!("timed out after {:?}", self.settings.call_timeout),
            }),
        }
    }

    fn material(
        &self,
        request: &SyncRequest,
        fetched: &FetchedSecret,
        hash: &str,
        synced_at: DateTime<Utc>,
    ) -> SecretMaterial {
        let labels = BTreeMap::from([(OWNER_LABEL.to_string(), self.owner.name.clone())]);
        let annotations = BTreeMap::from([
            (VERSION_ANNOTATION.to_string(), fetched.version.id.clone()),
            (
                VERSION_CREATED_ANNOTATION.to_string(),
                fetched.version.created.to_string(),
            ),
            (SYNCED_AT_ANNOTATION.to_string(), synced_at.to_rfc3339()),
            (CONTENT_HASH_ANNOTATION.to_string(), hash.to_string()),
            (SOURCE_ANNOTATION.to_string(), source_of(&request.reference)),
        ]);

        SecretMaterial {
            namespace: request.namespace.clone(),
            name: request.local_name.clone(),
            key: request.key.clone(),
            value: fetched.value.clone(),
            labels,
            annotations,
            owner_reference: self.owner.reference.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_separates_key_and_value() {
        assert_eq!(content_hash("password", "x"), content_hash("password", "x"));
        assert_ne!(content_hash("pass", "wordx"), content_hash("password", "x"));
        assert_eq!(content_hash("k", "v").len(), 64);
    }

    #[test]
    fn test_recorded_version_requires_same_source() {
        let reference = SecretRef::new("kv", "admin");
        let state = LocalSecretState {
            labels: BTreeMap::new(),
            annotations: BTreeMap::from([
                (SOURCE_ANNOTATION.to_string(), "kv/admin".to_string()),
                (VERSION_ANNOTATION.to_string(), "v2".to_string()),
                (VERSION_CREATED_ANNOTATION.to_string(), "200".to_string()),
            ]),
        };
        assert_eq!(
            recorded_version(&state, &reference),
            Some(SecretVersion::new("v2", 200))
        );

        // Mapping switched to another remote secret: versions are not comparable
        let other = SecretRef::new("kv", "reader");
        assert_eq!(recorded_version(&state, &other), None);
    }

    #[test]
    fn test_sync_error_classification() {
        let reference = SecretRef::new("kv", "s");
        assert!(SyncError::from(SourceError::fetch(&reference, "503")).is_transient());
        assert!(!SyncError::from(SourceError::auth(&reference, "403")).is_transient());
        assert!(!SyncError::LocalNameConflict {
            namespace: "ns".into(),
            name: "n".into(),
            owner: "o".into(),
        }
        .is_transient());
    }
}
