//! Core types and constants shared across sbal crates.
//!
//! This crate provides:
//! - Default configuration values
//! - Error type constants for metrics/logging
//! - The bidirectional bridge pump used after a completed upstream handshake

pub mod defaults;
pub mod errors;
pub mod io;

// Re-export commonly used items at crate root
pub use defaults::*;
pub use errors::*;

/// Project name.
pub const PROJECT_NAME: &str = "sbal";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
