//! Key Vault Secret Sync Controller Library
//!
//! Federates Kubernetes service accounts with Azure managed identities and
//! materializes Azure Key Vault secrets as Kubernetes Secrets, driven by
//! `KeyVaultSecretSync` resources committed to Git.
//!
//! ## Quick Start
//!
//! ```rust
//! use keyvault_sync_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod cluster;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod provider;
pub mod runtime;
