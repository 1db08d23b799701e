//! # Configuration
//!
//! Controller and HTTP server settings, loaded from the environment at startup.

mod controller;

pub use controller::{ControllerConfig, ServerConfig};
