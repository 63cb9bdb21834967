//! Dual health-check scheduler: a TCP reachability timer and an end-to-end
//! HTTPS timer, each probing every registry entry per tick.
//!
//! Ticks never wait for probes: every probe runs as its own task, so a slow
//! round can still be in flight when the next tick fires, and late results
//! still apply. Cancelling the token stops the timers; probes already in
//! flight run to completion and write their outcome.

use std::sync::Arc;
use std::time::Duration;

use sbal_config::CheckConfig;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::probe::{self, HttpsProber, ProbeError};
use crate::registry::UpstreamPool;

pub struct HealthChecker {
    pool: Arc<UpstreamPool>,
    config: CheckConfig,
    prober: Arc<HttpsProber>,
    connect_timeout: Duration,
    token: CancellationToken,
}

impl HealthChecker {
    pub fn new(
        pool: Arc<UpstreamPool>,
        config: CheckConfig,
        connect_timeout: Duration,
        token: CancellationToken,
    ) -> Result<Self, ProbeError> {
        let prober = Arc::new(HttpsProber::new(&config, connect_timeout)?);
        Ok(Self {
            pool,
            config,
            prober,
            connect_timeout,
            token,
        })
    }

    /// Start both probe timers. The returned handles complete once the
    /// cancellation token fires.
    pub fn spawn(&self) -> (JoinHandle<()>, JoinHandle<()>) {
        let tcp = tokio::spawn(tcp_check_loop(
            self.pool.clone(),
            Duration::from_secs(self.config.tcp_check_start_secs),
            Duration::from_secs(self.config.tcp_check_period_secs),
            self.connect_timeout,
            self.token.clone(),
        ));
        let connect = tokio::spawn(connect_check_loop(
            self.pool.clone(),
            self.prober.clone(),
            Duration::from_secs(self.config.connect_check_start_secs),
            Duration::from_secs(self.config.connect_check_period_secs),
            self.token.clone(),
        ));
        info!(
            tcp_period_secs = self.config.tcp_check_period_secs,
            connect_period_secs = self.config.connect_check_period_secs,
            "health checks started"
        );
        (tcp, connect)
    }

    /// Cancel pending timer waits. In-flight probes are not aborted.
    pub fn stop(&self) {
        self.token.cancel();
    }
}

async fn tcp_check_loop(
    pool: Arc<UpstreamPool>,
    start: Duration,
    period: Duration,
    connect_timeout: Duration,
    token: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for server in pool.servers() {
                    let server = server.clone();
                    tokio::spawn(async move {
                        match probe::tcp_probe(server.host(), server.port(), connect_timeout).await {
                            Ok(()) => {
                                server.record_tcp_ok();
                                debug!(name = %server.name(), "tcp probe ok");
                            }
                            Err(e) => {
                                server.record_tcp_err();
                                debug!(name = %server.name(), error = %e, "tcp probe failed");
                            }
                        }
                    });
                }
            }
            _ = token.cancelled() => break,
        }
    }
}

async fn connect_check_loop(
    pool: Arc<UpstreamPool>,
    prober: Arc<HttpsProber>,
    start: Duration,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for server in pool.servers() {
                    let server = server.clone();
                    let prober = prober.clone();
                    tokio::spawn(async move {
                        match prober.probe(&server).await {
                            Ok(()) => {
                                server.record_connect_ok();
                                debug!(name = %server.name(), "https probe ok");
                            }
                            Err(e) => {
                                server.record_connect_err();
                                debug!(name = %server.name(), error = %e, "https probe failed");
                            }
                        }
                    });
                }
            }
            _ = token.cancelled() => break,
        }
    }
}
