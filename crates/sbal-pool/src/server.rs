//! One upstream SOCKS5 server: fixed identity plus mutable liveness.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use sbal_config::UpstreamConfig;

/// Liveness state, written only by the health checker.
#[derive(Debug, Clone)]
pub struct Liveness {
    /// Most recent successful TCP reachability probe.
    pub last_online_time: Option<SystemTime>,
    /// Most recent successful end-to-end HTTPS probe.
    pub last_connect_time: Option<SystemTime>,
    pub last_connect_failed: bool,
    pub is_offline: bool,
    pub is_manual_disable: bool,
}

/// Descriptor and liveness for one upstream server.
///
/// Identity fields are fixed after load. Liveness sits behind one mutex whose
/// critical sections are short and never held across an await — that mutex is
/// the serialization domain for this server's state.
pub struct UpstreamServer {
    index: usize,
    name: String,
    host: String,
    port: u16,
    auth_user: String,
    auth_pwd: String,
    liveness: Mutex<Liveness>,
    /// Bridged connections assigned to this server, monotonic.
    connect_count: AtomicU64,
}

impl UpstreamServer {
    pub(crate) fn from_config(index: usize, config: &UpstreamConfig) -> Self {
        Self {
            index,
            name: config.name.clone(),
            host: config.host.clone(),
            port: config.port,
            auth_user: config.auth_user.clone(),
            auth_pwd: config.auth_pwd.clone(),
            liveness: Mutex::new(Liveness {
                last_online_time: None,
                last_connect_time: None,
                last_connect_failed: true,
                is_offline: true,
                // Config-time disable folds into the runtime flag, so the
                // admin endpoint can re-enable the server later.
                is_manual_disable: config.disable,
            }),
            connect_count: AtomicU64::new(0),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn auth_user(&self) -> &str {
        &self.auth_user
    }

    pub fn auth_pwd(&self) -> &str {
        &self.auth_pwd
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Liveness> {
        self.liveness.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Passes all liveness and admin checks and may be selected.
    pub fn is_eligible(&self) -> bool {
        let l = self.lock();
        l.last_connect_time.is_some()
            && l.last_online_time.is_some()
            && !l.last_connect_failed
            && !l.is_offline
            && !l.is_manual_disable
    }

    pub fn liveness(&self) -> Liveness {
        self.lock().clone()
    }

    /// A TCP reachability probe succeeded.
    pub fn record_tcp_ok(&self) {
        let mut l = self.lock();
        if l.is_offline {
            // Coming back from offline re-arms the connect flag; the HTTPS
            // probe has to re-confirm before the server is eligible again.
            l.last_connect_failed = false;
        }
        l.last_online_time = Some(SystemTime::now());
        l.is_offline = false;
    }

    /// A TCP reachability probe failed. `last_online_time` keeps its old
    /// value so the status page still shows when the server was last seen.
    pub fn record_tcp_err(&self) {
        self.lock().is_offline = true;
    }

    /// An end-to-end HTTPS probe succeeded.
    pub fn record_connect_ok(&self) {
        let mut l = self.lock();
        l.last_connect_time = Some(SystemTime::now());
        l.last_connect_failed = false;
    }

    /// An end-to-end HTTPS probe failed.
    pub fn record_connect_err(&self) {
        self.lock().last_connect_failed = true;
    }

    pub fn set_manual_disable(&self, disabled: bool) {
        self.lock().is_manual_disable = disabled;
    }

    /// Count one bridged connection assigned to this server.
    pub fn mark_bridged(&self) -> u64 {
        self.connect_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn connect_count(&self) -> u64 {
        self.connect_count.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for UpstreamServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamServer")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("eligible", &self.is_eligible())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(disable: bool) -> UpstreamServer {
        UpstreamServer::from_config(
            0,
            &UpstreamConfig {
                name: "a".into(),
                host: "127.0.0.1".into(),
                port: 1080,
                disable,
                auth_user: String::new(),
                auth_pwd: String::new(),
            },
        )
    }

    #[test]
    fn starts_offline_and_ineligible() {
        let s = server(false);
        let l = s.liveness();
        assert!(l.is_offline);
        assert!(l.last_connect_failed);
        assert!(l.last_online_time.is_none());
        assert!(!s.is_eligible());
    }

    #[test]
    fn recovery_needs_both_probes() {
        let s = server(false);

        s.record_tcp_ok();
        let l = s.liveness();
        assert!(!l.is_offline);
        assert!(!l.last_connect_failed);
        assert!(l.last_online_time.is_some());
        // still no successful end-to-end probe
        assert!(!s.is_eligible());

        s.record_connect_ok();
        assert!(s.is_eligible());
    }

    #[test]
    fn tcp_failure_takes_server_out_but_keeps_last_online() {
        let s = server(false);
        s.record_tcp_ok();
        s.record_connect_ok();
        assert!(s.is_eligible());

        s.record_tcp_err();
        assert!(!s.is_eligible());
        assert!(s.liveness().last_online_time.is_some());
    }

    #[test]
    fn offline_recovery_rearms_connect_flag() {
        let s = server(false);
        s.record_tcp_ok();
        s.record_connect_ok();

        s.record_tcp_err();
        s.record_connect_err();
        assert!(!s.is_eligible());

        // TCP success after offline clears the connect-failed flag; the old
        // last_connect_time is still there, so the server is selectable again
        // pending the next HTTPS round.
        s.record_tcp_ok();
        assert!(s.is_eligible());
    }

    #[test]
    fn config_disable_maps_to_manual_disable() {
        let s = server(true);
        s.record_tcp_ok();
        s.record_connect_ok();
        assert!(!s.is_eligible());

        s.set_manual_disable(false);
        assert!(s.is_eligible());
    }

    #[test]
    fn connect_count_is_monotonic() {
        let s = server(false);
        assert_eq!(s.connect_count(), 0);
        assert_eq!(s.mark_bridged(), 1);
        assert_eq!(s.mark_bridged(), 2);
        assert_eq!(s.connect_count(), 2);
    }
}
