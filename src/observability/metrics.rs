//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `keyvault_sync_reconciliations_total{trigger}` - Reconciliations that ran, by drift reason
//! - `keyvault_sync_reconciliation_errors_total{kind}` - Failed reconciliations (transient/fatal)
//! - `keyvault_sync_reconciliation_duration_seconds` - Duration of reconciliations
//! - `keyvault_sync_requeues_total{reason}` - Requeues by trigger source
//! - `keyvault_sync_secrets_written_total` - Local secrets created or updated
//! - `keyvault_sync_secrets_unchanged_total` - Syncs that found the local secret current
//! - `keyvault_sync_secrets_stale_total` - Fetches that returned an older version than materialized
//! - `keyvault_sync_fetch_retries_total` - Fetch retries inside a sync
//! - `keyvault_sync_identity_bindings_total{result}` - Identity bindings (applied/unchanged)
//! - `keyvault_sync_provider_operations_total{provider,operation}` - Azure API calls
//! - `keyvault_sync_provider_operation_duration_seconds{provider,operation}` - Azure API latency
//! - `keyvault_sync_provider_operation_errors_total{provider}` - Failed Azure API calls

use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "keyvault_sync_reconciliations_total",
            "Total number of reconciliations by trigger",
        ),
        &["trigger"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "keyvault_sync_reconciliation_errors_total",
            "Total number of reconciliation errors by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "keyvault_sync_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "keyvault_sync_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static SECRETS_WRITTEN_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "keyvault_sync_secrets_written_total",
        "Total number of local secrets created or updated",
    )
    .expect("Failed to create SECRETS_WRITTEN_TOTAL metric - this should never happen")
});

static SECRETS_UNCHANGED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "keyvault_sync_secrets_unchanged_total",
        "Total number of syncs that found the local secret already current",
    )
    .expect("Failed to create SECRETS_UNCHANGED_TOTAL metric - this should never happen")
});

static SECRETS_STALE_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "keyvault_sync_secrets_stale_total",
        "Total number of fetches older than the materialized version",
    )
    .expect("Failed to create SECRETS_STALE_TOTAL metric - this should never happen")
});

static FETCH_RETRIES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "keyvault_sync_fetch_retries_total",
        "Total number of Key Vault fetch retries",
    )
    .expect("Failed to create FETCH_RETRIES_TOTAL metric - this should never happen")
});

static IDENTITY_BINDINGS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "keyvault_sync_identity_bindings_total",
            "Total number of identity bindings by result",
        ),
        &["result"],
    )
    .expect("Failed to create IDENTITY_BINDINGS_TOTAL metric - this should never happen")
});

static PROVIDER_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "keyvault_sync_provider_operations_total",
            "Total number of provider operations by provider and operation",
        ),
        &["provider", "operation"],
    )
    .expect("Failed to create PROVIDER_OPERATIONS_TOTAL metric - this should never happen")
});

static PROVIDER_OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "keyvault_sync_provider_operation_duration_seconds",
            "Duration of provider operations in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["provider", "operation"],
    )
    .expect("Failed to create PROVIDER_OPERATION_DURATION metric - this should never happen")
});

static PROVIDER_OPERATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "keyvault_sync_provider_operation_errors_total",
            "Total number of provider operation errors by provider",
        ),
        &["provider"],
    )
    .expect("Failed to create PROVIDER_OPERATION_ERRORS_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Registration only fails on duplicate metric names"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRETS_WRITTEN_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRETS_UNCHANGED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRETS_STALE_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FETCH_RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(IDENTITY_BINDINGS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_OPERATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_OPERATION_ERRORS_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(trigger: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[trigger]).inc();
}

/// `kind` is `transient` or `fatal`
pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_secrets_written() {
    SECRETS_WRITTEN_TOTAL.inc();
}

pub fn increment_secrets_unchanged() {
    SECRETS_UNCHANGED_TOTAL.inc();
}

pub fn increment_secrets_stale() {
    SECRETS_STALE_TOTAL.inc();
}

pub fn increment_fetch_retries() {
    FETCH_RETRIES_TOTAL.inc();
}

pub fn increment_identity_bindings(result: &str) {
    IDENTITY_BINDINGS_TOTAL.with_label_values(&[result]).inc();
}

/// Record a successful provider call
pub fn record_provider_operation(provider: &str, operation: &str, duration: f64) {
    PROVIDER_OPERATIONS_TOTAL
        .with_label_values(&[provider, operation])
        .inc();
    PROVIDER_OPERATION_DURATION
        .with_label_values(&[provider, operation])
        .observe(duration);
}

pub fn increment_provider_operation_errors(provider: &str) {
    PROVIDER_OPERATION_ERRORS_TOTAL
        .with_label_values(&[provider])
        .inc();
}

/// Encode the registry in the Prometheus text format
pub fn gather_text() -> Result<Vec<u8>> {
    use prometheus::{Encoder, TextEncoder};

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}
