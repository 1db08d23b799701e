//! # Controller
//!
//! - `reconciler`: drift detection, convergence and status for `KeyVaultSecretSync`
//! - `identity`: federated credential and service account binding
//! - `syncer`: Key Vault secret materialization
//! - `backoff`: Fibonacci and exponential backoff
//! - `server`: metrics and probe endpoints

pub mod backoff;
pub mod identity;
pub mod reconciler;
pub mod server;
pub mod syncer;
