//! Configuration validation logic.

use sbal_core::defaults::{MAX_AUTH_FIELD_LEN, MAX_TARGET_HOST_LEN};

use crate::Config;
use crate::loader::ConfigError;
use crate::types::SelectRule;

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.balancer.listen.trim().is_empty() {
        return Err(ConfigError::Validation("balancer.listen is empty".into()));
    }
    if config.upstream.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[upstream]] entry is required".into(),
        ));
    }
    for (i, u) in config.upstream.iter().enumerate() {
        if u.name.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "upstream[{i}].name is empty"
            )));
        }
        if u.host.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "upstream[{i}].host is empty"
            )));
        }
        if u.host.len() > MAX_TARGET_HOST_LEN {
            return Err(ConfigError::Validation(format!(
                "upstream[{i}].host exceeds {MAX_TARGET_HOST_LEN} bytes"
            )));
        }
        if u.port == 0 {
            return Err(ConfigError::Validation(format!(
                "upstream[{i}].port must be 1..=65535"
            )));
        }
        if u.auth_user.len() > MAX_AUTH_FIELD_LEN || u.auth_pwd.len() > MAX_AUTH_FIELD_LEN {
            return Err(ConfigError::Validation(format!(
                "upstream[{i}]: auth_user/auth_pwd must be at most {MAX_AUTH_FIELD_LEN} bytes"
            )));
        }
        if u.auth_user.is_empty() && !u.auth_pwd.is_empty() {
            return Err(ConfigError::Validation(format!(
                "upstream[{i}]: auth_pwd set without auth_user"
            )));
        }
    }
    if config.balancer.select_rule == SelectRule::ChangeByTime
        && config.balancer.server_change_time_secs == 0
    {
        return Err(ConfigError::Validation(
            "balancer.server_change_time_secs must be > 0 for change_by_time".into(),
        ));
    }
    if config.balancer.connect_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "balancer.connect_timeout_secs must be > 0".into(),
        ));
    }
    if config.balancer.handshake_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "balancer.handshake_timeout_secs must be > 0".into(),
        ));
    }
    if config.balancer.relay_buffer_size < 1024 {
        return Err(ConfigError::Validation(
            "balancer.relay_buffer_size must be >= 1024".into(),
        ));
    }
    if config.check.tcp_check_period_secs == 0 || config.check.connect_check_period_secs == 0 {
        return Err(ConfigError::Validation(
            "check periods must be > 0".into(),
        ));
    }
    if config.check.test_remote_host.trim().is_empty() {
        return Err(ConfigError::Validation("check.test_remote_host is empty".into()));
    }
    if config.check.test_remote_host.len() > MAX_TARGET_HOST_LEN {
        return Err(ConfigError::Validation(format!(
            "check.test_remote_host exceeds {MAX_TARGET_HOST_LEN} bytes"
        )));
    }
    if config.check.test_remote_port == 0 {
        return Err(ConfigError::Validation(
            "check.test_remote_port must be 1..=65535".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BalancerConfig, CheckConfig, Config, UpstreamConfig};

    fn sample() -> Config {
        Config {
            balancer: BalancerConfig {
                listen: "127.0.0.1:5000".into(),
                select_rule: SelectRule::Loop,
                server_change_time_secs: 300,
                connect_timeout_secs: 10,
                handshake_timeout_secs: 10,
                relay_idle_timeout_secs: 600,
                relay_buffer_size: 32768,
                tcp: Default::default(),
            },
            upstream: vec![UpstreamConfig {
                name: "a".into(),
                host: "127.0.0.1".into(),
                port: 1080,
                disable: false,
                auth_user: String::new(),
                auth_pwd: String::new(),
            }],
            check: CheckConfig::default(),
            status: Default::default(),
            metrics: Default::default(),
            logging: Default::default(),
        }
    }

    #[test]
    fn accepts_minimal_config() {
        validate_config(&sample()).unwrap();
    }

    #[test]
    fn rejects_empty_upstream_list() {
        let mut c = sample();
        c.upstream.clear();
        assert!(validate_config(&c).is_err());
    }

    #[test]
    fn rejects_zero_port() {
        let mut c = sample();
        c.upstream[0].port = 0;
        assert!(validate_config(&c).is_err());
    }

    #[test]
    fn rejects_oversize_auth_fields() {
        let mut c = sample();
        c.upstream[0].auth_user = "u".repeat(256);
        assert!(validate_config(&c).is_err());
    }

    #[test]
    fn rejects_password_without_user() {
        let mut c = sample();
        c.upstream[0].auth_pwd = "p".into();
        assert!(validate_config(&c).is_err());
    }

    #[test]
    fn rejects_zero_change_time_for_change_by_time() {
        let mut c = sample();
        c.balancer.select_rule = SelectRule::ChangeByTime;
        c.balancer.server_change_time_secs = 0;
        assert!(validate_config(&c).is_err());
    }

    #[test]
    fn rejects_oversize_test_remote_host() {
        let mut c = sample();
        c.check.test_remote_host = "h".repeat(254);
        assert!(validate_config(&c).is_err());
    }
}
