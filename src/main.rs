//! # Key Vault Secret Sync Controller
//!
//! A Kubernetes controller that lets a Git commit stand in for the runbook
//! that used to provision Azure secrets for a workload.
//!
//! For every `KeyVaultSecretSync` it:
//!
//! 1. **Binds the identity** - creates the federated identity credential on the
//!    managed identity and annotates the workload's service account for the
//!    Azure workload identity webhook
//! 2. **Syncs secrets** - fetches each Key Vault secret and writes it into a
//!    Kubernetes Secret owned by the resource
//! 3. **Stays converged** - re-checks on `refreshInterval`, on spec changes and
//!    on the `keyvault-sync.gitops.io/reconcile` annotation
//!
//! Configuration comes from the environment (see `ControllerConfig::from_env`);
//! the flags below override it.

use anyhow::Result;
use clap::Parser;
use keyvault_sync_controller::config::{ControllerConfig, ServerConfig};
use keyvault_sync_controller::runtime::{deletion, initialization, watch_loop};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "keyvault-sync-controller", version, about)]
struct Args {
    /// Port for /metrics, /healthz and /readyz
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Log output format (json or text)
    #[arg(long, env = "LOG_FORMAT")]
    log_format: Option<String>,

    /// Resources reconciled in parallel
    #[arg(long, env = "MAX_CONCURRENT_RECONCILIATIONS")]
    concurrency: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut controller_config = ControllerConfig::from_env();
    let mut server_config = ServerConfig::from_env();
    if let Some(port) = args.metrics_port {
        server_config.metrics_port = port;
    }
    if let Some(format) = args.log_format {
        controller_config.log_format = format;
    }
    if let Some(concurrency) = args.concurrency {
        controller_config.max_concurrent_reconciliations = concurrency.max(1);
    }

    let init = initialization::initialize(controller_config, server_config).await?;

    deletion::start_deletion_watch(init.api.clone(), Arc::clone(&init.reconciler));

    watch_loop::run_watch_loop(init.api, init.reconciler, init.server_state).await
}
