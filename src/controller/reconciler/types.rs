//! # Types
//!
//! Core types for the reconciler.

use crate::cluster::{KubeSecretSink, KubeServiceAccounts, SecretSink, ServiceAccountStore};
use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::identity::BindingError;
use crate::controller::reconciler::validation::ValidationError;
use crate::controller::syncer::SyncError;
use crate::provider::azure::{ArmFederation, AzureKeyVault};
use crate::provider::{FederationApi, SecretSource};
use azure_core::credentials::TokenCredential;
use kube::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("invalid spec: {0}")]
    Validation(#[from] ValidationError),
    #[error("secret {local_name}: {source}")]
    Sync {
        local_name: String,
        #[source]
        source: SyncError,
    },
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error("Kubernetes API error: {0}")]
    Kube(String),
}

impl ReconcilerError {
    /// Transient errors are retried with backoff, fatal ones wait for a spec change
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Sync { source, .. } => source.is_transient(),
            Self::Binding(e) => e.is_transient(),
            Self::Kube(_) => true,
        }
    }

    /// Condition reason recorded in status
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationFailed",
            Self::Sync {
                source: SyncError::LocalNameConflict { .. },
                ..
            } => "LocalNameConflict",
            Self::Sync {
                source: SyncError::Source(e),
                ..
            } if !e.is_transient() => "AuthError",
            Self::Sync {
                source: SyncError::Cluster(_),
                ..
            } => "KubernetesError",
            Self::Sync {
                source: SyncError::Cancelled { .. },
                ..
            } => "Cancelled",
            Self::Sync { .. } => "FetchError",
            Self::Binding(BindingError::Conflict { .. }) => "BindingConflict",
            Self::Binding(BindingError::Auth(_)) => "AuthError",
            Self::Binding(BindingError::Cluster(_)) => "KubernetesError",
            Self::Binding(BindingError::Unavailable(_)) => "BindingUnavailable",
            Self::Kube(_) => "KubernetesError",
        }
    }
}

/// Backoff state for a specific resource
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl Default for BackoffState {
    fn default() -> Self {
        Self {
            backoff: FibonacciBackoff::new(1, 10),
            error_count: 0,
        }
    }
}

impl BackoffState {
    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }

    /// Record a failure and return the requeue delay
    ///
    /// Transient failures walk the Fibonacci sequence; fatal ones wait for the cap
    /// (or a spec change, whichever comes first).
    pub fn next_requeue(&mut self, fatal: bool) -> Duration {
        self.increment_error();
        if fatal {
            self.backoff.max_backoff()
        } else {
            self.backoff.next_backoff()
        }
    }
}

/// External systems a reconcile talks to
#[derive(Clone)]
pub struct Backends {
    pub source: Arc<dyn SecretSource>,
    pub sink: Arc<dyn SecretSink>,
    pub federation: Arc<dyn FederationApi>,
    pub service_accounts: Arc<dyn ServiceAccountStore>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

impl Backends {
    /// Kubernetes for local objects, Azure REST APIs for everything remote
    #[must_use]
    pub fn azure(
        client: &Client,
        http: reqwest::Client,
        credential: Arc<dyn TokenCredential>,
        arm_endpoint: &str,
    ) -> Self {
        Self {
            source: Arc::new(AzureKeyVault::new(http.clone(), Arc::clone(&credential))),
            sink: Arc::new(KubeSecretSink::new(client.clone())),
            federation: Arc::new(ArmFederation::new(http, credential, arm_endpoint)),
            service_accounts: Arc::new(KubeServiceAccounts::new(client.clone())),
        }
    }
}

pub struct Reconciler {
    pub client: Client,
    pub backends: Backends,
    pub config: ControllerConfig,
    // Backoff state per resource (identified by namespace/name)
    // Owned by the error policy so a failing resource never delays others
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
    // Cancellation token per resource, fired by the deletion watch
    pub cancellations: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("backends", &self.backends)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(client: Client, backends: Backends, config: ControllerConfig) -> Self {
        Self {
            client,
            backends,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
            cancellations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Token cancelled when the resource is deleted
    ///
    /// A token that already fired is replaced, so a resource recreated under
    /// the same key starts clean.
    pub fn cancellation_token(&self, key: &str) -> CancellationToken {
        let mut tokens = self
            .cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let token = tokens.entry(key.to_string()).or_default();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }

    /// Cancel in-flight work for a deleted resource and drop its state
    pub fn forget(&self, key: &str) {
        if let Some(token) = self
            .cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
        {
            token.cancel();
        }
        self.backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Delay the error policy will choose for the next failure, without recording it
    pub fn peek_backoff(&self, key: &str, fatal: bool) -> Duration {
        let mut state = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .unwrap_or_default();
        state.next_requeue(fatal)
    }

    /// Clear the error backoff after a successful reconcile
    pub fn reset_backoff(&self, key: &str) {
        if let Some(state) = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(key)
        {
            state.reset();
        }
    }
}

/// `namespace/name` key used for per-resource state
#[must_use]
pub fn resource_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}
