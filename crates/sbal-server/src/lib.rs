//! The balancer server: accepts SOCKS5 clients on one ingress, hands each
//! connection to a health-checked upstream SOCKS5 proxy, performs the
//! upstream handshake on the client's behalf, then bridges bytes.

pub mod cli;
mod error;
mod handler;
pub mod ingress;
pub mod metrics;
mod status;

pub use cli::ServerArgs;
pub use error::ServerError;
pub use tokio_util::sync::CancellationToken;

use std::sync::Arc;
use std::time::Duration;

use sbal_config::{BalancerConfig, Config};
use sbal_pool::{HealthChecker, UpstreamPool};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Shared state for connection handlers.
pub(crate) struct ServerState {
    pub(crate) pool: Arc<UpstreamPool>,
    pub(crate) balancer: BalancerConfig,
}

/// Run the balancer with the given configuration: build the pool, start the
/// health checkers, then serve the ingress until `shutdown` fires.
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<(), ServerError> {
    let pool = Arc::new(UpstreamPool::from_config(&config));

    let checker = HealthChecker::new(
        pool.clone(),
        config.check.clone(),
        Duration::from_secs(config.balancer.connect_timeout_secs),
        shutdown.child_token(),
    )?;
    checker.spawn();

    serve(config, pool, shutdown).await
}

/// Serve the ingress and status endpoint over an existing pool.
///
/// Split from [`run`] so the accept path can be driven with a hand-built
/// pool (the health checkers are what `run` adds on top).
pub async fn serve(
    config: Config,
    pool: Arc<UpstreamPool>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    if let Some(listen) = config.status.listen.clone() {
        let pool = pool.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = status::serve_status(listen, pool, token).await {
                error!(error = %e, "status endpoint failed");
            }
        });
    }

    let listener = TcpListener::bind(&config.balancer.listen).await?;
    info!(
        listen = %config.balancer.listen,
        upstreams = pool.len(),
        rule = ?pool.rule(),
        "balancer started"
    );

    let state = Arc::new(ServerState {
        pool,
        balancer: config.balancer.clone(),
    });

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        if let Err(e) = handler::apply_tcp_options(&stream, &state.balancer.tcp) {
                            debug!(peer = %peer, error = %e, "failed to set socket options");
                        }
                        let state = state.clone();
                        tokio::spawn(async move {
                            handler::handle_conn(stream, peer, state).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!("shutting down balancer");
                break;
            }
        }
    }

    Ok(())
}
