//! # Configuration
//!
//! Runtime configuration for the controller and its HTTP server.
//!
//! Values come from environment variables (see [`ControllerConfig::from_env`])
//! and can be overridden by command line flags in the binary.

mod controller;
mod server;

pub use controller::ControllerConfig;
pub use server::ServerConfig;

use thiserror::Error;

/// Configuration that cannot be used to start the controller
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
