//! waypoint
//!
//! Reverse proxy whose routing table is built from a service registry and
//! replaced live whenever the registry changes.
//!
//! # Architecture Overview
//!
//! ```text
//!   registry backend ──watch──▶ reload loop ──publish──▶ RuntimeContext
//!   (file/static/consul)        (merge, compile, diff)   (current table)
//!                                                              │ lookup
//!   client ──▶ listener units (http, https, tcp, tcp+sni) ─────┘──▶ target
//!
//!   admin listener: health, routes, manual overrides
//!   signals ──▶ shutdown coordinator: stop, drain, deregister
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use waypoint::config::{load_config, ProxyConfig};
use waypoint::lifecycle::{self, signals, RuntimeContext};
use waypoint::observability::init_logging;

#[derive(Parser)]
#[command(name = "waypoint", version, about = "Service-discovery driven reverse proxy")]
struct Cli {
    /// Path to the TOML configuration file. Defaults are used when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("waypoint: {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => ProxyConfig::default(),
    };

    if let Err(e) = init_logging(&config.log) {
        eprintln!("waypoint: cannot initialize logging: {e}");
        return ExitCode::FAILURE;
    }
    tracing::info!(
        config = %serde_json::to_string(&config).unwrap_or_default(),
        "runtime config"
    );

    let ctx = Arc::new(RuntimeContext::new());
    signals::spawn(ctx.clone());

    match lifecycle::run(ctx, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "exiting");
            ExitCode::FAILURE
        }
    }
}
