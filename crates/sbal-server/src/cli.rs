//! CLI module for sbal-server.

use std::io;
use std::path::PathBuf;

use clap::Parser;
use sbal_config::{CliOverrides, LoggingConfig, apply_overrides, load_config, validate_config};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::metrics;

/// Balancer server CLI arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "sbal-server",
    version,
    about = "TCP ingress balancer over multiple SOCKS5 upstream proxies"
)]
pub struct ServerArgs {
    /// Config file path (toml/json/jsonc/yaml).
    #[arg(short, long, default_value = "sbal.toml")]
    pub config: PathBuf,

    #[command(flatten)]
    pub overrides: CliOverrides,
}

/// Run the balancer with the given CLI arguments.
pub async fn run(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(&args.config)?;
    apply_overrides(&mut config, &args.overrides);
    validate_config(&config)?;

    init_tracing(&config.logging);

    if let Some(listen) = &config.metrics.listen {
        match metrics::init_prometheus(listen) {
            Ok(()) => info!(listen = %listen, "prometheus metrics exporter started"),
            Err(e) => warn!("failed to start metrics exporter: {e}"),
        }
    }

    // The returned token is the shutdown root: the accept loop selects on
    // it, and the health-check timers hang off a child of it inside `run`.
    let shutdown = install_shutdown_handler();

    crate::run(config, shutdown).await?;
    Ok(())
}

/// Spawn the signal watcher and hand back the token it cancels.
fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        cancel.cancel();
    });
    token
}

/// Resolve on SIGINT, and on SIGTERM where the platform has it.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c_pressed() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                ctrl_c_pressed().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c_pressed().await;
}

async fn ctrl_c_pressed() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // If the handler cannot be installed at all, never resolve; killing
        // the process is the remaining way out.
        warn!("failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
}

fn init_tracing(config: &LoggingConfig) {
    let level = config.level.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.format.as_deref().unwrap_or("pretty") {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .init();
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_writer(io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .init();
        }
    }
}
