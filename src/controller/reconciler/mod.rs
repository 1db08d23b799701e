//! # Reconciler
//!
//! Core reconciliation logic for `KeyVaultSecretSync` resources.
//!
//! ## Module Structure
//!
//! - `types.rs` - Reconciler context, backends, errors and backoff state
//! - `phase.rs` - Phase state machine and drift detection
//! - `reconcile.rs` - Main reconciliation entry point and `converge`
//! - `status.rs` - Status building and patching
//! - `validation.rs` - Spec validation and duration parsing

mod phase;
mod reconcile;
mod status;
mod types;
pub mod validation;

pub use phase::{detect_drift, DriftReason, Phase, PhaseEvent};
pub use reconcile::{converge, reconcile, Convergence};
pub use status::{build_status, status_changed, synced_secret_status, StatusReport};
pub use types::{resource_key, BackoffState, Backends, Reconciler, ReconcilerError};
