//! Metrics collection and Prometheus exporter.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize Prometheus metrics exporter.
///
/// Starts an HTTP server on the given address to expose metrics.
pub fn init_prometheus(listen: &str) -> Result<(), String> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| format!("invalid metrics listen address: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install prometheus exporter: {}", e))?;

    Ok(())
}

/// Total number of client connections accepted.
pub const CONNECTIONS_TOTAL: &str = "sbal_connections_total";
/// Number of currently active client connections.
pub const CONNECTIONS_ACTIVE: &str = "sbal_connections_active";
/// Total number of completed upstream handshakes.
pub const HANDSHAKES_TOTAL: &str = "sbal_handshakes_total";
/// Total number of failed upstream handshakes, by kind.
pub const HANDSHAKE_FAILURES_TOTAL: &str = "sbal_handshake_failures_total";
/// Total number of connection-level errors, by kind (see `sbal_core::errors`).
pub const ERRORS_TOTAL: &str = "sbal_errors_total";
/// Total bytes relayed from clients to upstreams.
pub const BYTES_UP_TOTAL: &str = "sbal_bytes_up_total";
/// Total bytes relayed from upstreams to clients.
pub const BYTES_DOWN_TOTAL: &str = "sbal_bytes_down_total";

#[inline]
pub fn record_connection_accepted() {
    counter!(CONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

#[inline]
pub fn record_connection_closed() {
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

#[inline]
pub fn record_handshake_ok() {
    counter!(HANDSHAKES_TOTAL).increment(1);
}

#[inline]
pub fn record_handshake_failure(kind: &'static str) {
    counter!(HANDSHAKE_FAILURES_TOTAL, "kind" => kind).increment(1);
}

#[inline]
pub fn record_error(kind: &'static str) {
    counter!(ERRORS_TOTAL, "kind" => kind).increment(1);
}

#[inline]
pub fn record_relay_bytes(up: u64, down: u64) {
    counter!(BYTES_UP_TOTAL).increment(up);
    counter!(BYTES_DOWN_TOTAL).increment(down);
}
