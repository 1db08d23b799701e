//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, Azure credentials and Kubernetes client setup.

use crate::config::{ControllerConfig, ServerConfig};
use crate::constants::DEFAULT_ARM_ENDPOINT;
use crate::controller::reconciler::{Backends, Reconciler};
use crate::controller::server::{start_server, ServerState};
use crate::crd::KeyVaultSecretSync;
use crate::observability;
use crate::provider::azure::credential::from_env as azure_credential_from_env;
use anyhow::{Context, Result};
use kube::{api::Api, api::ListParams, Client, ResourceExt};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// API for the `KeyVaultSecretSync` CRD across all namespaces
    pub api: Api<KeyVaultSecretSync>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `log_level`; `log_format` selects JSON or text output.
pub fn init_tracing(log_level: &str, log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("keyvault_sync_controller={}", log_level.to_lowercase()).into()
    });

    let result = if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if let Err(e) = result {
        warn!("Tracing subscriber already initialized: {}", e);
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Azure credential and Kubernetes client creation
/// - Reconciler setup
/// - Startup summary of existing resources
pub async fn initialize(
    controller_config: ControllerConfig,
    server_config: ServerConfig,
) -> Result<InitializationResult> {
    // Required for rustls 0.23+ before any TLS connection is made
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("Failed to install rustls crypto provider");
    }

    init_tracing(&controller_config.log_level, &controller_config.log_format);

    info!("Starting Key Vault Secret Sync Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());
    let server_state_clone = Arc::clone(&server_state);
    let server_port = server_config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let http = reqwest::Client::builder()
        .timeout(controller_config.external_call_timeout())
        .build()
        .context("Failed to build HTTP client")?;
    let credential = azure_credential_from_env()
        .context("Failed to configure the controller's Azure credential")?;
    let arm_endpoint =
        std::env::var("ARM_ENDPOINT").unwrap_or_else(|_| DEFAULT_ARM_ENDPOINT.to_string());
    let backends = Backends::azure(&client, http, credential, &arm_endpoint);

    let api: Api<KeyVaultSecretSync> = Api::all(client.clone());
    let reconciler = Arc::new(Reconciler::new(client.clone(), backends, controller_config));

    summarize_existing_resources(&api).await?;

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        api,
        reconciler,
        server_state,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(server_config.startup_timeout_secs);
    let poll_interval = Duration::from_millis(server_config.poll_interval_ms);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Verify the CRD is queryable and log what the controller is about to manage
///
/// The watch reconciles every listed resource on its initial sync.
async fn summarize_existing_resources(api: &Api<KeyVaultSecretSync>) -> Result<()> {
    let list = api.list(&ListParams::default()).await.context(
        "KeyVaultSecretSync CRD is not queryable - install it with `crdgen | kubectl apply -f -`",
    )?;

    let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in &list.items {
        by_namespace
            .entry(item.namespace().unwrap_or_default())
            .or_default()
            .push(item.name_any());
    }

    info!(
        "Found {} existing KeyVaultSecretSync resources in {} namespaces",
        list.items.len(),
        by_namespace.len()
    );
    for (namespace, mut names) in by_namespace {
        names.sort();
        let shown = if names.len() <= 3 {
            names.join(", ")
        } else {
            format!("{}, ... ({} total)", names[..3].join(", "), names.len())
        };
        info!("  {}: {}", namespace, shown);
    }

    Ok(())
}
