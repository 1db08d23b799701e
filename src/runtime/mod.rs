//! # Runtime
//!
//! Controller process lifecycle.
//!
//! - `initialization`: rustls, logging, metrics, HTTP server, clients and startup reconcile
//! - `watch_loop`: kube-runtime `Controller` loop with restart handling
//! - `error_policy`: per-resource backoff and watch stream error classification
//! - `deletion`: cancels in-flight syncs for deleted resources

pub mod deletion;
pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
