//! Unified sbal CLI.
//!
//! - `sbal serve` - Run the balancer
//! - `sbal check` - Validate a configuration file and exit
//!
//! The balancer can also be run as the standalone `sbal-server` binary.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// sbal unified CLI.
#[derive(Parser)]
#[command(
    name = "sbal",
    version,
    about = "TCP ingress balancer over multiple SOCKS5 upstream proxies",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the balancer.
    #[command(name = "serve", alias = "server")]
    Serve(Box<sbal_server::ServerArgs>),

    /// Validate a configuration file and exit.
    #[command(name = "check")]
    Check {
        /// Config file path (toml/json/jsonc/yaml).
        #[arg(short, long, default_value = "sbal.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result: Result<(), String> = match cli.command {
        Commands::Serve(args) => sbal_server::cli::run(*args)
            .await
            .map_err(|e| e.to_string()),
        Commands::Check { config } => check_config(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn check_config(path: &PathBuf) -> Result<(), String> {
    let config = sbal_config::load_config(path).map_err(|e| e.to_string())?;
    sbal_config::validate_config(&config).map_err(|e| e.to_string())?;
    println!(
        "{}: ok ({} upstream server(s), rule {:?})",
        path.display(),
        config.upstream.len(),
        config.balancer.select_rule
    );
    Ok(())
}
