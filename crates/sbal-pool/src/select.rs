//! Upstream selection policies.
//!
//! All policies share one cursor lock, so a pick is atomic with respect to
//! other picks and to admin cursor overrides. Liveness may be stale by up to
//! one probe period; a pick never blocks on probing.

use std::sync::Arc;
use std::sync::MutexGuard;
use std::time::Instant;

use rand::seq::SliceRandom;
use sbal_config::SelectRule;

use crate::registry::{Cursor, UpstreamPool};
use crate::server::UpstreamServer;

impl UpstreamPool {
    /// Pick one eligible server per the configured rule, or `None` when no
    /// server is eligible.
    pub fn pick(&self) -> Option<Arc<UpstreamServer>> {
        if self.is_empty() {
            return None;
        }
        let mut cursor = self.lock_cursor();
        match self.rule {
            SelectRule::Loop => self.next_server(&mut cursor),
            SelectRule::OneByOne => self.sticky_server(&mut cursor),
            SelectRule::ChangeByTime => {
                if cursor.last_change_time.elapsed() >= self.server_change_time {
                    cursor.last_change_time = Instant::now();
                    self.next_server(&mut cursor)
                } else {
                    self.sticky_server(&mut cursor)
                }
            }
            SelectRule::Random => self.random_server(),
        }
    }

    /// Round-robin: advance the cursor by one, then scan at most a full
    /// revolution for an eligible server. The cursor commits to the returned
    /// slot; after a fruitless revolution it is back where it started.
    fn next_server(&self, cursor: &mut MutexGuard<'_, Cursor>) -> Option<Arc<UpstreamServer>> {
        let n = self.len();
        for _ in 0..n {
            cursor.last_use_index = (cursor.last_use_index + 1) % n;
            let server = &self.servers()[cursor.last_use_index];
            if server.is_eligible() {
                return Some(server.clone());
            }
        }
        None
    }

    /// Sticky: keep the cursor's server while it is eligible, otherwise scan
    /// forward for the next eligible slot and commit to it.
    fn sticky_server(&self, cursor: &mut MutexGuard<'_, Cursor>) -> Option<Arc<UpstreamServer>> {
        let n = self.len();
        let start = cursor.last_use_index;
        for step in 0..n {
            let idx = (start + step) % n;
            let server = &self.servers()[idx];
            if server.is_eligible() {
                cursor.last_use_index = idx;
                return Some(server.clone());
            }
        }
        None
    }

    /// Uniform draw over the eligible set. Does not move the cursor.
    fn random_server(&self) -> Option<Arc<UpstreamServer>> {
        let eligible: Vec<_> = self
            .servers()
            .iter()
            .filter(|s| s.is_eligible())
            .cloned()
            .collect();
        eligible.choose(&mut rand::thread_rng()).cloned()
    }
}
