//! # Watch Loop
//!
//! Controller watch loop that monitors `KeyVaultSecretSync` resources and
//! triggers reconciliation when changes are detected.

use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::KeyVaultSecretSync;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::StreamExt;
use kube::api::Api;
use kube_runtime::{controller, watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Run the controller watch loop
///
/// Drift detection lives in `reconcile`, so every watch event is handed to it;
/// events caused by the controller's own status patches return without work.
/// The loop restarts the controller stream if it ends before shutdown.
pub async fn run_watch_loop(
    api: Api<KeyVaultSecretSync>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let config = reconciler.config.clone();
    let backoff_start_ms = u64::try_from(config.fetch_backoff_start().as_millis()).unwrap_or(500);
    let backoff_max_ms = u64::try_from(config.fetch_backoff_max().as_millis()).unwrap_or(8_000);
    let restart_delay = config.watch_restart_delay();
    let backoff_duration_ms = Arc::new(AtomicU64::new(backoff_start_ms));

    // Mark not ready on SIGINT/SIGTERM so probes drain traffic while in-flight reconciles finish
    let shutdown_server_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        let signal = tokio::signal::ctrl_c().await;
        handle_shutdown_signal(signal, &shutdown_server_state);
    });

    loop {
        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let backoff = Arc::clone(&backoff_duration_ms);
        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop"
        );

        info!(
            concurrency = config.max_concurrent_reconciliations,
            "Starting controller watch loop..."
        );
        Controller::new(api.clone(), watcher::Config::default().any_semantic())
            .with_config(
                controller::Config::default().concurrency(config.max_concurrent_reconciliations),
            )
            .shutdown_on_signal()
            .run(reconcile, handle_reconciliation_error, Arc::clone(&reconciler))
            .filter_map(move |x| {
                let backoff = Arc::clone(&backoff);
                async move {
                    match &x {
                        Ok((object, _action)) => {
                            backoff.store(backoff_start_ms, Ordering::Relaxed);
                            debug!(resource = %object, "watch.event.reconciled");
                            Some(x)
                        }
                        // Already handled by the error policy
                        Err(controller::Error::ReconcilerFailed(error, object)) => {
                            debug!(resource = %object, error = %error, "watch.event.reconciliation_failed");
                            Some(x)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                backoff_max_ms,
                                restart_delay,
                            )
                            .await
                            .map(|()| x)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .instrument(watch_span)
            .await;

        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            restart_delay.as_secs()
        );
        tokio::time::sleep(restart_delay).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}

/// Flip readiness off once the shutdown signal arrives
///
/// If the signal handler could not be installed readiness stays on; the
/// controller stream still stops through `shutdown_on_signal`.
fn handle_shutdown_signal(signal: std::io::Result<()>, server_state: &ServerState) {
    match signal {
        Ok(()) => {
            info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
            server_state.is_ready.store(false, Ordering::Relaxed);
        }
        Err(e) => {
            warn!(error = %e, "Failed to listen for shutdown signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signal_clears_readiness() {
        let state = ServerState::new();
        state.is_ready.store(true, Ordering::Relaxed);

        handle_shutdown_signal(Ok(()), &state);
        assert!(!state.is_ready.load(Ordering::Relaxed));
    }

    #[test]
    fn test_signal_registration_failure_keeps_serving() {
        let state = ServerState::new();
        state.is_ready.store(true, Ordering::Relaxed);

        handle_shutdown_signal(
            Err(std::io::Error::other("signal handler unavailable")),
            &state,
        );
        assert!(state.is_ready.load(Ordering::Relaxed));
    }
}
