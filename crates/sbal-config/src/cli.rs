//! CLI override definitions and application logic.

use clap::Parser;

use crate::Config;
use crate::types::SelectRule;

#[derive(Debug, Clone, Parser, Default)]
pub struct CliOverrides {
    /// Override ingress listen address, e.g. 0.0.0.0:5000
    #[arg(long)]
    pub listen: Option<String>,
    /// Override upstream selection rule
    #[arg(long, value_enum)]
    pub select_rule: Option<SelectRule>,
    /// Override upstream connect timeout (seconds)
    #[arg(long)]
    pub connect_timeout_secs: Option<u64>,
    /// Override upstream handshake timeout (seconds)
    #[arg(long)]
    pub handshake_timeout_secs: Option<u64>,
    /// Override HTTPS probe remote host
    #[arg(long)]
    pub test_remote_host: Option<String>,
    /// Override HTTPS probe remote port
    #[arg(long)]
    pub test_remote_port: Option<u16>,
    /// Override status endpoint listen address
    #[arg(long)]
    pub status_listen: Option<String>,
    /// Override metrics listen address
    #[arg(long)]
    pub metrics_listen: Option<String>,
    /// Override log level (trace/debug/info/warn/error)
    #[arg(long)]
    pub log_level: Option<String>,
}

pub fn apply_overrides(config: &mut Config, overrides: &CliOverrides) {
    if let Some(v) = &overrides.listen {
        config.balancer.listen = v.clone();
    }
    if let Some(v) = overrides.select_rule {
        config.balancer.select_rule = v;
    }
    if let Some(v) = overrides.connect_timeout_secs {
        config.balancer.connect_timeout_secs = v;
    }
    if let Some(v) = overrides.handshake_timeout_secs {
        config.balancer.handshake_timeout_secs = v;
    }
    if let Some(v) = &overrides.test_remote_host {
        config.check.test_remote_host = v.clone();
    }
    if let Some(v) = overrides.test_remote_port {
        config.check.test_remote_port = v;
    }
    if let Some(v) = &overrides.status_listen {
        config.status.listen = Some(v.clone());
    }
    if let Some(v) = &overrides.metrics_listen {
        config.metrics.listen = Some(v.clone());
    }
    if let Some(v) = &overrides.log_level {
        config.logging.level = Some(v.clone());
    }
}
