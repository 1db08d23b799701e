//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Timeout applied to every external call (seconds)
    pub external_call_timeout_secs: u64,
    /// Fetch attempts per sync before the error is returned to the reconcile loop
    pub fetch_max_attempts: u32,
    /// Exponential fetch retry starting delay (milliseconds)
    pub fetch_backoff_start_ms: u64,
    /// Exponential fetch retry maximum delay (milliseconds)
    pub fetch_backoff_max_ms: u64,
    /// Watch stream restart delay after the stream ends (seconds)
    pub watch_restart_delay_secs: u64,
    /// Minimum refresh interval (seconds)
    /// Enforced minimum to prevent Key Vault throttling
    pub min_refresh_interval_secs: u64,
    /// Maximum concurrent reconciliations
    /// Limits how many resources can be reconciled simultaneously
    pub max_concurrent_reconciliations: u16,
    /// Controller namespace
    pub controller_namespace: String,
    /// OIDC issuer used for bindings that do not set `identity.issuerUrl`
    /// On AKS: `az aks show --query oidcIssuerProfile.issuerUrl`
    pub default_issuer_url: Option<String>,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            external_call_timeout_secs: DEFAULT_EXTERNAL_CALL_TIMEOUT_SECS,
            fetch_max_attempts: DEFAULT_FETCH_MAX_ATTEMPTS,
            fetch_backoff_start_ms: DEFAULT_FETCH_BACKOFF_START_MS,
            fetch_backoff_max_ms: DEFAULT_FETCH_BACKOFF_MAX_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            min_refresh_interval_secs: MIN_REFRESH_INTERVAL_SECS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            controller_namespace: "keyvault-sync-system".to_string(),
            default_issuer_url: None,
            log_level: "INFO".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            external_call_timeout_secs: env_var_or_default(
                "EXTERNAL_CALL_TIMEOUT_SECS",
                DEFAULT_EXTERNAL_CALL_TIMEOUT_SECS,
            ),
            fetch_max_attempts: env_var_or_default("FETCH_MAX_ATTEMPTS", DEFAULT_FETCH_MAX_ATTEMPTS)
                .max(1),
            fetch_backoff_start_ms: env_var_or_default(
                "FETCH_BACKOFF_START_MS",
                DEFAULT_FETCH_BACKOFF_START_MS,
            ),
            fetch_backoff_max_ms: env_var_or_default(
                "FETCH_BACKOFF_MAX_MS",
                DEFAULT_FETCH_BACKOFF_MAX_MS,
            ),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            min_refresh_interval_secs: env_var_or_default(
                "MIN_REFRESH_INTERVAL_SECS",
                MIN_REFRESH_INTERVAL_SECS,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            controller_namespace: env_var_or_default_str("POD_NAMESPACE", "keyvault-sync-system"),
            default_issuer_url: std::env::var("OIDC_ISSUER_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            log_level: env_var_or_default_str("LOG_LEVEL", "INFO"),
            log_format: env_var_or_default_str("LOG_FORMAT", "json"),
        }
    }

    /// Get external call timeout duration
    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_secs(self.external_call_timeout_secs)
    }

    /// Get fetch backoff start duration
    pub fn fetch_backoff_start(&self) -> Duration {
        Duration::from_millis(self.fetch_backoff_start_ms)
    }

    /// Get fetch backoff max duration
    pub fn fetch_backoff_max(&self) -> Duration {
        Duration::from_millis(self.fetch_backoff_max_ms)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

/// HTTP server configuration for metrics and probes
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub metrics_port: u16,
    pub startup_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            startup_timeout_secs: env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            poll_interval_ms: env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
        }
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
