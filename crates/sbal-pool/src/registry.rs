//! The upstream registry: an ordered, load-time-fixed set of servers plus
//! the selection cursor.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use sbal_config::{Config, SelectRule, UpstreamConfig};
use serde::Serialize;

use crate::server::UpstreamServer;

/// Cursor state shared by the round-robin family of selection rules.
pub(crate) struct Cursor {
    /// Always in `0..servers.len()`.
    pub(crate) last_use_index: usize,
    /// When change_by_time last rotated.
    pub(crate) last_change_time: Instant,
}

/// Ordered set of upstream servers, insertion order = config order.
pub struct UpstreamPool {
    servers: Vec<Arc<UpstreamServer>>,
    pub(crate) rule: SelectRule,
    pub(crate) server_change_time: Duration,
    pub(crate) cursor: Mutex<Cursor>,
}

impl UpstreamPool {
    pub fn new(
        upstreams: &[UpstreamConfig],
        rule: SelectRule,
        server_change_time: Duration,
    ) -> Self {
        let servers = upstreams
            .iter()
            .enumerate()
            .map(|(i, u)| Arc::new(UpstreamServer::from_config(i, u)))
            .collect();
        Self {
            servers,
            rule,
            server_change_time,
            cursor: Mutex::new(Cursor {
                last_use_index: 0,
                last_change_time: Instant::now(),
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.upstream,
            config.balancer.select_rule,
            Duration::from_secs(config.balancer.server_change_time_secs),
        )
    }

    pub fn servers(&self) -> &[Arc<UpstreamServer>] {
        &self.servers
    }

    pub fn get(&self, index: usize) -> Option<&Arc<UpstreamServer>> {
        self.servers.get(index)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn rule(&self) -> SelectRule {
        self.rule
    }

    pub(crate) fn lock_cursor(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn last_use_index(&self) -> usize {
        self.lock_cursor().last_use_index
    }

    /// Admin override of the selection cursor. Applies iff `index` addresses
    /// an existing slot.
    pub fn force_set_index(&self, index: usize) -> bool {
        if index < self.servers.len() {
            self.lock_cursor().last_use_index = index;
            true
        } else {
            false
        }
    }

    /// Admin on/off switch for one server. Returns false for an unknown slot.
    pub fn set_manual_disable(&self, index: usize, disabled: bool) -> bool {
        match self.servers.get(index) {
            Some(s) => {
                s.set_manual_disable(disabled);
                true
            }
            None => false,
        }
    }

    /// Read-only view for the status endpoint.
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            rule: self.rule,
            last_use_index: self.last_use_index(),
            servers: self.servers.iter().map(|s| ServerSnapshot::of(s)).collect(),
        }
    }
}

/// Serializable view of the whole pool.
#[derive(Debug, Serialize)]
pub struct PoolSnapshot {
    pub rule: SelectRule,
    pub last_use_index: usize,
    pub servers: Vec<ServerSnapshot>,
}

/// Serializable view of one server's identity and liveness.
#[derive(Debug, Serialize)]
pub struct ServerSnapshot {
    pub index: usize,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub online: bool,
    pub connect_failed: bool,
    /// Unix seconds of the most recent successful TCP probe.
    pub last_online_epoch_secs: Option<u64>,
    /// Unix seconds of the most recent successful HTTPS probe.
    pub last_connect_epoch_secs: Option<u64>,
    pub connect_count: u64,
    pub manual_disable: bool,
    pub eligible: bool,
}

impl ServerSnapshot {
    fn of(server: &UpstreamServer) -> Self {
        let l = server.liveness();
        Self {
            index: server.index(),
            name: server.name().to_string(),
            host: server.host().to_string(),
            port: server.port(),
            online: !l.is_offline,
            connect_failed: l.last_connect_failed,
            last_online_epoch_secs: l.last_online_time.and_then(epoch_secs),
            last_connect_epoch_secs: l.last_connect_time.and_then(epoch_secs),
            connect_count: server.connect_count(),
            manual_disable: l.is_manual_disable,
            eligible: server.is_eligible(),
        }
    }
}

fn epoch_secs(t: SystemTime) -> Option<u64> {
    t.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstreams(n: usize) -> Vec<UpstreamConfig> {
        (0..n)
            .map(|i| UpstreamConfig {
                name: format!("server-{i}"),
                host: "127.0.0.1".into(),
                port: 1080 + i as u16,
                disable: false,
                auth_user: String::new(),
                auth_pwd: String::new(),
            })
            .collect()
    }

    #[test]
    fn indexes_follow_config_order() {
        let pool = UpstreamPool::new(&upstreams(3), SelectRule::Loop, Duration::ZERO);
        for (i, s) in pool.servers().iter().enumerate() {
            assert_eq!(s.index(), i);
            assert_eq!(s.name(), format!("server-{i}"));
        }
    }

    #[test]
    fn force_set_index_checks_bounds() {
        let pool = UpstreamPool::new(&upstreams(3), SelectRule::Loop, Duration::ZERO);
        assert!(pool.force_set_index(2));
        assert_eq!(pool.last_use_index(), 2);
        assert!(!pool.force_set_index(3));
        assert_eq!(pool.last_use_index(), 2);
    }

    #[test]
    fn manual_disable_round_trips_through_snapshot() {
        let pool = UpstreamPool::new(&upstreams(2), SelectRule::Loop, Duration::ZERO);
        assert!(pool.set_manual_disable(1, true));
        assert!(!pool.set_manual_disable(9, true));

        let snap = pool.snapshot();
        assert!(!snap.servers[0].manual_disable);
        assert!(snap.servers[1].manual_disable);
        assert!(!snap.servers[1].eligible);
    }

    #[test]
    fn snapshot_reflects_probe_results() {
        let pool = UpstreamPool::new(&upstreams(1), SelectRule::Loop, Duration::ZERO);
        let snap = pool.snapshot();
        assert!(!snap.servers[0].online);
        assert!(snap.servers[0].last_online_epoch_secs.is_none());

        pool.servers()[0].record_tcp_ok();
        pool.servers()[0].record_connect_ok();
        let snap = pool.snapshot();
        assert!(snap.servers[0].online);
        assert!(snap.servers[0].last_online_epoch_secs.is_some());
        assert!(snap.servers[0].eligible);
    }
}
