//! # Azure Providers
//!
//! - `credential`: Entra ID tokens for the controller identity
//! - `key_vault`: Key Vault secret source
//! - `federation`: ARM federated identity credentials

pub mod credential;
pub mod federation;
pub mod key_vault;

pub use credential::{access_token, CredentialError};
pub use federation::ArmFederation;
pub use key_vault::AzureKeyVault;
