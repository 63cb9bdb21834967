//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Timeout Defaults
// ============================================================================

/// Default upstream TCP connect timeout in seconds (also used by probes).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default upstream SOCKS5 handshake timeout in seconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
/// Default relay idle timeout in seconds.
pub const DEFAULT_RELAY_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Buffer/Size Defaults
// ============================================================================

/// Default relay buffer size (32 KiB).
pub const DEFAULT_RELAY_BUFFER_SIZE: usize = 32768;

// ============================================================================
// TCP Socket Defaults
// ============================================================================

/// Default TCP_NODELAY (disable Nagle's algorithm for lower latency).
pub const DEFAULT_TCP_NO_DELAY: bool = true;
/// Default TCP Keep-Alive interval in seconds (0 = disabled).
pub const DEFAULT_TCP_KEEPALIVE_SECS: u64 = 300;

// ============================================================================
// Selection Defaults
// ============================================================================

/// Default dwell time for the change_by_time selection rule, in seconds.
pub const DEFAULT_SERVER_CHANGE_TIME_SECS: u64 = 300;

// ============================================================================
// Health Check Defaults
// ============================================================================

/// Default delay before the first TCP reachability probe, in seconds.
pub const DEFAULT_TCP_CHECK_START_SECS: u64 = 1;
/// Default period between TCP reachability probe rounds, in seconds.
pub const DEFAULT_TCP_CHECK_PERIOD_SECS: u64 = 30;
/// Default delay before the first end-to-end HTTPS probe, in seconds.
pub const DEFAULT_CONNECT_CHECK_START_SECS: u64 = 2;
/// Default period between end-to-end HTTPS probe rounds, in seconds.
pub const DEFAULT_CONNECT_CHECK_PERIOD_SECS: u64 = 150;
/// Default remote host the HTTPS probe is tunneled to.
pub const DEFAULT_TEST_REMOTE_HOST: &str = "www.google.com";
/// Default remote port the HTTPS probe is tunneled to.
pub const DEFAULT_TEST_REMOTE_PORT: u16 = 443;

// ============================================================================
// SOCKS5 Protocol Constants
// ============================================================================

/// Longest hostname the CONNECT request can carry.
pub const MAX_TARGET_HOST_LEN: usize = 253;
/// Longest username/password the auth subnegotiation can carry.
pub const MAX_AUTH_FIELD_LEN: usize = 255;
