//! Web frontend (backend-for-frontend)
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌────────────────────────────────────────────────┐
//!                    │                   WEB BFF                      │
//!                    │                                                │
//!   Browser request  │  ┌────────┐   ┌────────────┐   ┌───────────┐   │
//!   ─────────────────┼─▶│  http  │──▶│  request   │──▶│ forwarder │───┼──▶ REST API
//!                    │  │ server │   │  context   │   └───────────┘   │    image host
//!                    │  └────────┘   └─────┬──────┘                   │
//!                    │                     ▼                          │
//!   HTML / JSON      │               ┌────────────┐                   │
//!   ◀────────────────┼───────────────│  renderer  │◀── templates      │
//!                    │               └────────────┘                   │
//!                    │                                                │
//!                    │  config · security (csrf, fingerprint) ·       │
//!                    │  device · observability · lifecycle            │
//!                    └────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use web_bff::lifecycle::{startup, Shutdown};
use web_bff::observability::{logging, metrics};
use web_bff::StartupError;

#[derive(Debug, Parser)]
#[command(name = "web-bff", version, about = "Backend-for-frontend web server")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable dev mode (allows the placeholder CSRF secret).
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let cli = Cli::parse();

    let config = startup::load(cli.config.as_deref(), cli.dev)?;
    logging::init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        api = %config.api.host,
        dev_mode = config.dev_mode,
        "web-bff starting"
    );

    if config.observability.metrics_enabled {
        let addr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::Address(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr)?;
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = startup::build_server(config)?;

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
