//! # Custom Resource Definitions
//!
//! CRD types for the Key Vault sync controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `KeyVaultSecretSync` specification and default values
//! - `status.rs` - Status types for tracking reconciliation state

mod spec;
mod status;

pub use spec::{
    default_refresh_interval, IdentityConfig, KeyVaultSecretSync, KeyVaultSecretSyncSpec,
    SecretMapping,
};
pub use status::{Condition, IdentityBindingStatus, KeyVaultSecretSyncStatus, SyncedSecretStatus};
