//! Configuration loading and CLI definitions for the balancer.

pub mod cli;
mod defaults;
pub mod loader;
pub mod types;
pub mod validate;

pub use cli::{CliOverrides, apply_overrides};
pub use loader::{ConfigError, load_config};
pub use types::{
    BalancerConfig, CheckConfig, Config, LoggingConfig, MetricsConfig, SelectRule, StatusConfig,
    TcpConfig, UpstreamConfig,
};
pub use validate::validate_config;
