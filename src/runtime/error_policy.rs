//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! This module handles reconciliation errors and watch stream errors.

use crate::controller::reconciler::{resource_key, Reconciler, ReconcilerError};
use crate::crd::KeyVaultSecretSync;
use crate::observability::metrics;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tracing::{error, info, warn};

/// Handle reconciliation errors with per-resource Fibonacci backoff
///
/// Transient failures walk the sequence (1m, 1m, 2m, 3m, 5m, 8m, 10m).
/// Fatal failures requeue at the cap; a spec change still triggers an
/// immediate reconcile through the watch.
pub fn handle_reconciliation_error(
    obj: Arc<KeyVaultSecretSync>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.metadata.name.as_deref().unwrap_or("unknown");
    let namespace = obj.metadata.namespace.as_deref().unwrap_or("default");
    let fatal = !error.is_transient();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = name,
        resource.namespace = namespace,
        error.reason = error.reason(),
        error.fatal = fatal,
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}: {}", name, error);
    metrics::increment_reconciliation_errors(if fatal { "fatal" } else { "transient" });

    let key = resource_key(namespace, name);
    let (delay, error_count) = {
        let mut states = ctx
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = states.entry(key).or_default();
        let delay = state.next_requeue(fatal);
        (delay, state.error_count)
    };

    if fatal {
        warn!(
            "⚠️ Fatal error ({}), waiting {}s or for a spec change (error count: {})",
            error.reason(),
            delay.as_secs(),
            error_count
        );
    } else {
        info!(
            "🔄 Retrying with Fibonacci backoff: {}s (error count: {}, trigger source: error-backoff)",
            delay.as_secs(),
            error_count
        );
    }

    metrics::increment_requeues_total("error-backoff");
    Action::requeue(delay)
}

/// How the watch loop should react to a stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    Unauthorized,
    Expired,
    Throttled,
    NotFound,
    Other,
}

/// Classify a controller stream error by its rendered text
///
/// 404 is checked first because not-found errors can carry "WatchFailed" in
/// their chain alongside unrelated status codes.
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    if is_not_found {
        return WatchErrorKind::NotFound;
    }
    if error_string.contains("401") || error_string.contains("Unauthorized") {
        return WatchErrorKind::Unauthorized;
    }
    if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        return WatchErrorKind::Expired;
    }
    if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        return WatchErrorKind::Throttled;
    }
    WatchErrorKind::Other
}

/// Handle watch stream errors with appropriate classification and backoff
///
/// Returns `None` to filter out the error (allow restart) or `Some(())` to continue.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    match classify_watch_error(error_string) {
        WatchErrorKind::Unauthorized => {
            error!(
                "❌ Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired"
            );
            error!("   Verify the controller ServiceAccount can list keyvaultsecretsyncs cluster-wide:");
            error!(
                "      kubectl auth can-i list keyvaultsecretsyncs.keyvault-sync.gitops.io --as=system:serviceaccount:keyvault-sync-system:keyvault-sync-controller --all-namespaces"
            );
            warn!(
                "⏳ Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                watch_restart_delay.as_secs()
            );
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
        WatchErrorKind::Expired => {
            warn!(error_type = "410", "watch.error.resource_version_expired");
            None
        }
        WatchErrorKind::Throttled => {
            let current_backoff = backoff.load(Ordering::Relaxed);
            warn!(
                "API server storage reinitializing (429), backing off for {}ms before restart...",
                current_backoff
            );
            tokio::time::sleep(Duration::from_millis(current_backoff)).await;
            let new_backoff = current_backoff.saturating_mul(2).min(max_backoff_ms);
            backoff.store(new_backoff, Ordering::Relaxed);
            None
        }
        WatchErrorKind::NotFound => {
            warn!(
                "Resource not found (404) - normal if it was deleted or the CRD is missing. Error: {}",
                error_string
            );
            Some(())
        }
        WatchErrorKind::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_watch_error() {
        assert_eq!(
            classify_watch_error("ObjectNotFound: keyvaultsecretsyncs"),
            WatchErrorKind::NotFound
        );
        assert_eq!(
            classify_watch_error("WatchFailed: 401 Unauthorized"),
            WatchErrorKind::Unauthorized
        );
        assert_eq!(
            classify_watch_error("too old resource version: 123"),
            WatchErrorKind::Expired
        );
        assert_eq!(
            classify_watch_error("429 TooManyRequests"),
            WatchErrorKind::Throttled
        );
        assert_eq!(classify_watch_error("connection reset"), WatchErrorKind::Other);
    }

    #[test]
    fn test_not_found_wins_over_unauthorized() {
        assert_eq!(
            classify_watch_error("WatchFailed: Unauthorized: invalid type: integer `404`"),
            WatchErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_throttled_doubles_backoff_up_to_max() {
        let backoff = Arc::new(AtomicU64::new(10));
        assert!(handle_watch_stream_error("429", &backoff, 15, Duration::ZERO)
            .await
            .is_none());
        assert_eq!(backoff.load(Ordering::Relaxed), 15);
    }
}
