//! # Status Management
//!
//! Builds `KeyVaultSecretSync` status from a reconcile outcome and patches it.
//! Patches are skipped when nothing but the reconcile timestamp changed, so
//! status writes never trigger reconciles of their own.

use crate::constants::{FIELD_MANAGER, RECONCILE_ANNOTATION};
use crate::controller::reconciler::phase::Phase;
use crate::controller::reconciler::types::ReconcilerError;
use crate::controller::syncer::SyncedSecret;
use crate::crd::{
    Condition, IdentityBindingStatus, KeyVaultSecretSync, KeyVaultSecretSyncStatus,
    SyncedSecretStatus,
};
use chrono::{DateTime, Utc};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use tracing::debug;

/// Outcome to record
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub phase: Phase,
    pub reason: &'static str,
    pub message: String,
    /// `None` keeps the previously recorded binding
    pub identity: Option<IdentityBindingStatus>,
    /// `None` keeps the previously recorded secrets
    pub secrets: Option<Vec<SyncedSecretStatus>>,
    pub next_reconcile: Option<DateTime<Utc>>,
}

#[must_use]
pub fn synced_secret_status(secret: &SyncedSecret) -> SyncedSecretStatus {
    SyncedSecretStatus {
        local_name: secret.local_name.clone(),
        vault_name: secret.reference.vault_name.clone(),
        secret_name: secret.reference.secret_name.clone(),
        version: secret.reference.version.clone(),
        last_synced_version: secret.last_synced_version.id.clone(),
        last_synced_version_created: secret.last_synced_version.created,
        last_synced_at: secret.last_synced_at.to_rfc3339(),
    }
}

/// Build the next status
///
/// The Ready condition keeps its transition time while its status is unchanged.
#[must_use]
pub fn build_status(
    previous: Option<&KeyVaultSecretSyncStatus>,
    generation: Option<i64>,
    report: StatusReport,
    now: DateTime<Utc>,
) -> KeyVaultSecretSyncStatus {
    let ready = if report.phase == Phase::Settled {
        "True"
    } else {
        "False"
    };
    let previous_ready = previous.and_then(|s| s.conditions.iter().find(|c| c.r#type == "Ready"));
    let last_transition_time = match previous_ready {
        Some(condition) if condition.status == ready => condition.last_transition_time.clone(),
        _ => Some(now.to_rfc3339()),
    };

    KeyVaultSecretSyncStatus {
        phase: Some(report.phase.as_str().to_string()),
        description: Some(report.message.clone()),
        conditions: vec![Condition {
            r#type: "Ready".to_string(),
            status: ready.to_string(),
            last_transition_time,
            reason: Some(report.reason.to_string()),
            message: Some(report.message),
        }],
        observed_generation: generation,
        last_reconcile_time: Some(now.to_rfc3339()),
        next_reconcile_time: report.next_reconcile.map(|t| t.to_rfc3339()),
        identity: report
            .identity
            .or_else(|| previous.and_then(|s| s.identity.clone())),
        secrets: report
            .secrets
            .unwrap_or_else(|| previous.map(|s| s.secrets.clone()).unwrap_or_default()),
    }
}

/// True when `next` differs from `previous` in anything but the reconcile timestamp
#[must_use]
pub fn status_changed(
    previous: Option<&KeyVaultSecretSyncStatus>,
    next: &KeyVaultSecretSyncStatus,
) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    let mut comparable = next.clone();
    comparable.last_reconcile_time = previous.last_reconcile_time.clone();
    &comparable != previous
}

/// Patch the status subresource if it changed
///
/// A resource deleted in the meantime is not an error.
pub async fn write_status(
    client: &Client,
    resource: &KeyVaultSecretSync,
    status: &KeyVaultSecretSyncStatus,
) -> Result<(), ReconcilerError> {
    if !status_changed(resource.status.as_ref(), status) {
        debug!(
            phase = status.phase.as_deref().unwrap_or_default(),
            "Skipping status update - status unchanged"
        );
        return Ok(());
    }

    let api: Api<KeyVaultSecretSync> = Api::namespaced(
        client.clone(),
        resource.namespace().as_deref().unwrap_or("default"),
    );
    let patch = serde_json::json!({ "status": status });

    match api
        .patch_status(
            &resource.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(patch),
        )
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
            debug!("Resource deleted before status update");
            Ok(())
        }
        Err(e) => Err(ReconcilerError::Kube(format!("failed to update status: {e}"))),
    }
}

/// Remove the manual reconcile annotation once it has been honored
pub async fn clear_reconcile_annotation(
    client: &Client,
    resource: &KeyVaultSecretSync,
) -> Result<(), ReconcilerError> {
    let api: Api<KeyVaultSecretSync> = Api::namespaced(
        client.clone(),
        resource.namespace().as_deref().unwrap_or("default"),
    );
    let mut annotations = serde_json::Map::new();
    annotations.insert(RECONCILE_ANNOTATION.to_string(), serde_json::Value::Null);
    let patch = serde_json::json!({ "metadata": { "annotations": annotations } });

    match api
        .patch(&resource.name_any(), &PatchParams::default(), &Patch::Merge(patch))
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
        Err(e) => Err(ReconcilerError::Kube(format!(
            "failed to clear {RECONCILE_ANNOTATION}: {e}"
        ))),
    }
}
