//! Configuration type definitions for the balancer, upstream pool, health
//! checks, status endpoint, metrics, and logging.

use serde::{Deserialize, Serialize};

use crate::defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub balancer: BalancerConfig,
    /// Upstream SOCKS5 servers, in priority/cursor order.
    pub upstream: Vec<UpstreamConfig>,
    #[serde(default)]
    pub check: CheckConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// Ingress listen address, e.g. "127.0.0.1:5000".
    pub listen: String,
    /// Upstream selection rule.
    #[serde(default)]
    pub select_rule: SelectRule,
    /// Dwell time for the change_by_time rule, in seconds.
    #[serde(default = "default_server_change_time_secs")]
    pub server_change_time_secs: u64,
    /// Upstream TCP connect timeout in seconds (also bounds probe connects).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Upstream SOCKS5 handshake timeout in seconds.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Relay idle timeout in seconds.
    #[serde(default = "default_relay_idle_timeout_secs")]
    pub relay_idle_timeout_secs: u64,
    /// Relay buffer size in bytes.
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,
    /// TCP socket options for accepted and outbound connections.
    #[serde(default)]
    pub tcp: TcpConfig,
}

/// One upstream SOCKS5 server entry. Order in the config file is the cursor
/// order used by the round-robin family of selection rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub name: String,
    /// IP literal or DNS name.
    pub host: String,
    pub port: u16,
    /// Config-time off switch; folded into the runtime manual-disable flag at
    /// load, so the admin endpoint can re-enable the server.
    #[serde(default)]
    pub disable: bool,
    /// Username for SOCKS5 user/pass auth. Empty = advertise no-auth only.
    #[serde(default)]
    pub auth_user: String,
    /// Password for SOCKS5 user/pass auth.
    #[serde(default)]
    pub auth_pwd: String,
}

/// Upstream selection rule identifier, used in configuration files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum SelectRule {
    /// Round-robin: advance the cursor, scan for the next eligible server.
    #[default]
    Loop,
    /// Sticky: keep the cursor's server while it stays eligible.
    OneByOne,
    /// Sticky within a dwell window, round-robin across windows.
    ChangeByTime,
    /// Uniform draw over the eligible set.
    Random,
}

/// TCP socket configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Disable Nagle's algorithm (TCP_NODELAY) for lower latency.
    #[serde(default = "default_tcp_no_delay")]
    pub no_delay: bool,
    /// TCP Keep-Alive interval in seconds (0 = disabled).
    #[serde(default = "default_tcp_keepalive_secs")]
    pub keepalive_secs: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            no_delay: default_tcp_no_delay(),
            keepalive_secs: default_tcp_keepalive_secs(),
        }
    }
}

/// Health check scheduling and the end-to-end probe target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Delay before the first TCP reachability probe round, in seconds.
    #[serde(default = "default_tcp_check_start_secs")]
    pub tcp_check_start_secs: u64,
    /// Period between TCP reachability probe rounds, in seconds.
    #[serde(default = "default_tcp_check_period_secs")]
    pub tcp_check_period_secs: u64,
    /// Delay before the first end-to-end HTTPS probe round, in seconds.
    #[serde(default = "default_connect_check_start_secs")]
    pub connect_check_start_secs: u64,
    /// Period between end-to-end HTTPS probe rounds, in seconds.
    #[serde(default = "default_connect_check_period_secs")]
    pub connect_check_period_secs: u64,
    /// Remote host the HTTPS probe is tunneled to through each upstream.
    #[serde(default = "default_test_remote_host")]
    pub test_remote_host: String,
    /// Remote port the HTTPS probe is tunneled to.
    #[serde(default = "default_test_remote_port")]
    pub test_remote_port: u16,
    /// Custom CA certificate path (PEM) for the probe TLS handshake.
    /// If unset, the webpki root store is used.
    #[serde(default)]
    pub ca: Option<String>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            tcp_check_start_secs: default_tcp_check_start_secs(),
            tcp_check_period_secs: default_tcp_check_period_secs(),
            connect_check_start_secs: default_connect_check_start_secs(),
            connect_check_period_secs: default_connect_check_period_secs(),
            test_remote_host: default_test_remote_host(),
            test_remote_port: default_test_remote_port(),
            ca: None,
        }
    }
}

/// Read-only status / admin HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StatusConfig {
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: Option<String>,
    /// Log format: json, pretty, or compact. Default: pretty.
    pub format: Option<String>,
}
