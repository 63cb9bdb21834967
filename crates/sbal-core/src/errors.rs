//! Error type constants for metrics and logging.
//!
//! These constants provide consistent error classification across all crates.

/// SOCKS5 handshake error against an upstream.
pub const ERROR_HANDSHAKE: &str = "handshake";
/// Protocol parsing/validation error.
pub const ERROR_PROTOCOL: &str = "protocol";
/// I/O error.
pub const ERROR_IO: &str = "io";
/// Timeout error.
pub const ERROR_TIMEOUT: &str = "timeout";
/// No eligible upstream to hand a connection to.
pub const ERROR_NO_UPSTREAM: &str = "no_upstream";
