//! # Reconcile
//!
//! Drives the identity binder and the secret syncer to convergence for one
//! `KeyVaultSecretSync`.
//!
//! Flow:
//! 1. Suspended resources only report `Suspended`
//! 2. Drift detection decides whether anything needs to happen
//! 3. `converge` binds the identity, then syncs every secret
//! 4. Status records the outcome; success requeues after `refreshInterval`,
//!    failures are requeued by the error policy

use crate::config::ControllerConfig;
use crate::controller::identity::{BinderSettings, IdentityBinder, IdentityBinding};
use crate::controller::reconciler::phase::{detect_drift, DriftReason, Phase, PhaseEvent};
use crate::controller::reconciler::status::{
    build_status, clear_reconcile_annotation, synced_secret_status, write_status, StatusReport,
};
use crate::controller::reconciler::types::{resource_key, Backends, Reconciler, ReconcilerError};
use crate::controller::reconciler::validation::{refresh_interval, validate_spec, ValidationError};
use crate::controller::syncer::{SecretOwner, SecretSyncer, SyncError, SyncOutcome, SyncRequest, SyncSettings};
use crate::crd::KeyVaultSecretSync;
use crate::observability::metrics;
use crate::provider::SecretRef;
use chrono::{DateTime, Utc};
use kube_runtime::controller::Action;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Everything a successful convergence established
#[derive(Debug, Clone)]
pub struct Convergence {
    pub binding: IdentityBinding,
    pub secrets: Vec<SyncOutcome>,
}

impl Convergence {
    #[must_use]
    pub fn written(&self) -> usize {
        self.secrets.iter().filter(|s| s.written).count()
    }
}

/// Bind the identity and sync every secret of `resource`
///
/// Secrets are synced one after another. A failing secret does not stop the
/// others; the most severe failure is returned once all were attempted.
///
/// # Errors
/// Validation, binding and sync failures, see `ReconcilerError`.
pub async fn converge(
    backends: &Backends,
    config: &ControllerConfig,
    resource: &KeyVaultSecretSync,
    cancel: CancellationToken,
) -> Result<Convergence, ReconcilerError> {
    let namespace = resource.namespace().ok_or_else(|| ValidationError::Field {
        field: "metadata.namespace".to_string(),
        reason: "KeyVaultSecretSync must be namespaced".to_string(),
    })?;
    let spec = &resource.spec;
    validate_spec(
        spec,
        config.min_refresh_interval_secs,
        config.default_issuer_url.as_deref(),
    )?;

    let identity = &spec.identity;
    let binder = IdentityBinder::new(
        Arc::clone(&backends.federation),
        Arc::clone(&backends.service_accounts),
        BinderSettings {
            client_id: identity.client_id.clone(),
            tenant_id: identity.tenant_id.clone(),
            issuer_url: identity
                .issuer_url
                .clone()
                .or_else(|| config.default_issuer_url.clone())
                .unwrap_or_default(),
            identity_resource_id: identity.identity_resource_id.clone(),
        },
        config.external_call_timeout(),
    );
    let binding = binder.bind(&namespace, &identity.service_account).await?;

    let syncer = SecretSyncer::new(
        Arc::clone(&backends.source),
        Arc::clone(&backends.sink),
        SecretOwner {
            name: resource.name_any(),
            reference: resource.controller_owner_ref(&()),
        },
        SyncSettings::from_config(config),
        cancel,
    );

    let mut secrets = Vec::with_capacity(spec.secrets.len());
    let mut failures: Vec<ReconcilerError> = Vec::new();
    for mapping in &spec.secrets {
        let mut reference = SecretRef::new(&spec.vault_name, &mapping.secret_name);
        if let Some(version) = &mapping.version {
            reference = reference.pinned(version);
        }
        let request = SyncRequest {
            reference,
            namespace: namespace.clone(),
            local_name: mapping.local_name.clone(),
            key: mapping.data_key().to_string(),
        };

        match syncer.sync(&request).await {
            Ok(outcome) => secrets.push(outcome),
            Err(source @ SyncError::Cancelled { .. }) => {
                return Err(ReconcilerError::Sync {
                    local_name: mapping.local_name.clone(),
                    source,
                })
            }
            Err(source) => {
                warn!(
                    local_name = mapping.local_name.as_str(),
                    error = %source,
                    "Secret sync failed"
                );
                failures.push(ReconcilerError::Sync {
                    local_name: mapping.local_name.clone(),
                    source,
                });
            }
        }
    }

    // Fatal failures need operator attention, report them over transient ones
    if let Some(index) = failures.iter().position(|e| !e.is_transient()) {
        return Err(failures.swap_remove(index));
    }
    if let Some(first) = failures.into_iter().next() {
        return Err(first);
    }

    Ok(Convergence { binding, secrets })
}

/// Time left until `nextReconcileTime`, at least one second
fn until_next_reconcile(resource: &KeyVaultSecretSync, now: DateTime<Utc>) -> Duration {
    resource
        .status
        .as_ref()
        .and_then(|s| s.next_reconcile_time.as_deref())
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .and_then(|next| (next.with_timezone(&Utc) - now).to_std().ok())
        .unwrap_or_default()
        .max(Duration::from_secs(1))
}

/// Reconcile one `KeyVaultSecretSync`
pub async fn reconcile(
    resource: Arc<KeyVaultSecretSync>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = resource.name_any();
    let namespace = resource.namespace().unwrap_or_default();
    let span = tracing::info_span!(
        "controller.reconcile",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        resource.generation = resource.metadata.generation.unwrap_or_default(),
    );

    async move {
        let key = resource_key(&namespace, &name);
        let previous = resource.status.as_ref();
        let previous_phase = Phase::parse(previous.and_then(|s| s.phase.as_deref()));
        let generation = resource.metadata.generation;
        let now = Utc::now();

        if resource.spec.suspend {
            let status = build_status(
                previous,
                generation,
                StatusReport {
                    phase: previous_phase.transition(PhaseEvent::Suspend),
                    reason: "Suspended",
                    message: "Reconciliation suspended".to_string(),
                    identity: None,
                    secrets: None,
                    next_reconcile: None,
                },
                now,
            );
            write_status(&ctx.client, &resource, &status).await?;
            debug!("Skipping reconciliation - resource is suspended");
            return Ok(Action::await_change());
        }

        let Some(trigger) = detect_drift(&resource, now) else {
            let wait = until_next_reconcile(&resource, now);
            debug!(
                requeue_in_secs = wait.as_secs(),
                "Skipping reconciliation - settled and current"
            );
            return Ok(Action::requeue(wait));
        };

        let phase = previous_phase.transition(PhaseEvent::DriftDetected);
        metrics::increment_reconciliations(trigger.as_str());
        info!(trigger = trigger.as_str(), from = %previous_phase, "Reconciling");

        let start = Instant::now();
        let cancel = ctx.cancellation_token(&key);
        let result = converge(&ctx.backends, &ctx.config, &resource, cancel).await;
        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        if trigger == DriftReason::Manual {
            if let Err(e) = clear_reconcile_annotation(&ctx.client, &resource).await {
                warn!(error = %e, "Failed to clear manual reconcile annotation");
            }
        }

        match result {
            Ok(convergence) => {
                let interval = refresh_interval(&resource.spec, ctx.config.min_refresh_interval_secs)?;
                let written = convergence.written();
                let total = convergence.secrets.len();
                let finished = Utc::now();
                let next = finished + chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::zero());

                let status = build_status(
                    previous,
                    generation,
                    StatusReport {
                        phase: phase.transition(PhaseEvent::SyncSucceeded),
                        reason: "ReconciliationSucceeded",
                        message: format!("{total} secrets synced, {written} updated"),
                        identity: Some((&convergence.binding).into()),
                        secrets: Some(
                            convergence
                                .secrets
                                .iter()
                                .map(|outcome| synced_secret_status(&outcome.secret))
                                .collect(),
                        ),
                        next_reconcile: Some(next),
                    },
                    finished,
                );
                write_status(&ctx.client, &resource, &status).await?;
                ctx.reset_backoff(&key);
                metrics::increment_requeues_total("timer-based");

                info!(
                    secrets = total,
                    written,
                    next_reconcile = next.to_rfc3339().as_str(),
                    "Reconciliation settled"
                );
                Ok(Action::requeue(interval))
            }
            Err(ReconcilerError::Sync {
                source: SyncError::Cancelled { .. },
                ..
            }) => {
                info!("Reconciliation cancelled - resource deleted");
                Ok(Action::await_change())
            }
            Err(error) => {
                let fatal = !error.is_transient();
                let delay = ctx.peek_backoff(&key, fatal);
                let finished = Utc::now();
                let status = build_status(
                    previous,
                    generation,
                    StatusReport {
                        phase: phase.transition(PhaseEvent::SyncFailed { fatal }),
                        reason: error.reason(),
                        message: error.to_string(),
                        identity: None,
                        secrets: None,
                        next_reconcile: Some(
                            finished + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()),
                        ),
                    },
                    finished,
                );
                if let Err(status_error) = write_status(&ctx.client, &resource, &status).await {
                    warn!(error = %status_error, "Failed to record reconciliation failure in status");
                }
                Err(error)
            }
        }
    }
    .instrument(span)
    .await
}
