//! Vigil CLI - the signer binary and operator tooling
//!
//! Configuration loading and the command implementations live in the library
//! so they can be exercised without spawning the binary.

#![forbid(unsafe_code)]

/// Subcommand implementations
pub mod commands;

/// Layered configuration
pub mod config;

pub use config::{ConfigError, VigilConfig};
