//! Default value functions for serde deserialization.
//!
//! These functions forward to constants defined in `sbal_core::defaults`.

use sbal_core::defaults;

/// Generate default value functions that forward to sbal_core::defaults constants.
macro_rules! default_fns {
    // For Copy types (integers, bool, etc.)
    ($($fn_name:ident => $const_name:ident : $ty:ty),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> $ty {
                defaults::$const_name
            }
        )*
    };
}

/// Generate default value functions that return String from &str constants.
macro_rules! default_string_fns {
    ($($fn_name:ident => $const_name:ident),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> String {
                defaults::$const_name.to_string()
            }
        )*
    };
}

default_fns! {
    default_connect_timeout_secs       => DEFAULT_CONNECT_TIMEOUT_SECS: u64,
    default_handshake_timeout_secs     => DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64,
    default_relay_idle_timeout_secs    => DEFAULT_RELAY_IDLE_TIMEOUT_SECS: u64,
    default_relay_buffer_size          => DEFAULT_RELAY_BUFFER_SIZE: usize,
    default_server_change_time_secs    => DEFAULT_SERVER_CHANGE_TIME_SECS: u64,
    default_tcp_check_start_secs       => DEFAULT_TCP_CHECK_START_SECS: u64,
    default_tcp_check_period_secs      => DEFAULT_TCP_CHECK_PERIOD_SECS: u64,
    default_connect_check_start_secs   => DEFAULT_CONNECT_CHECK_START_SECS: u64,
    default_connect_check_period_secs  => DEFAULT_CONNECT_CHECK_PERIOD_SECS: u64,
    default_test_remote_port           => DEFAULT_TEST_REMOTE_PORT: u16,
    // TCP socket options
    default_tcp_no_delay               => DEFAULT_TCP_NO_DELAY: bool,
    default_tcp_keepalive_secs         => DEFAULT_TCP_KEEPALIVE_SECS: u64,
}

default_string_fns! {
    default_test_remote_host => DEFAULT_TEST_REMOTE_HOST,
}
