//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use keyvault_sync_controller::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Seams to Azure and the cluster - implement these to swap backends
pub use crate::cluster::{ClusterError, SecretSink, ServiceAccountStore};
pub use crate::provider::{FederationApi, SecretSource, SourceError};

// Controller components
pub use crate::controller::identity::{BindingError, IdentityBinder, IdentityBinding};
pub use crate::controller::reconciler::{
    converge, reconcile, Backends, Phase, Reconciler, ReconcilerError,
};
pub use crate::controller::syncer::{SecretSyncer, SyncError, SyncOutcome, SyncRequest};

// Config types
pub use crate::config::{ControllerConfig, ServerConfig};

// Azure implementations
pub use crate::provider::azure::{ArmFederation, AzureKeyVault};
