//! Transit gateway (v1)
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ correlation ID ──▶ route table ──▶ auth collaborator
//!                                                      │
//!                                                      ▼
//!              ┌──────────── circuit breaker (shared store) ◀──┐
//!              │ open: SERVICE_CIRCUIT_OPEN                     │ outcome
//!              ▼ closed / half-open                             │
//!        timeout manager ──▶ business handler ──▶ audit trail ──┘
//!              │ overrun: REQUEST_TIMEOUT            (hash chain, shared store)
//!              ▼
//!   Client ◀── response + x-correlation-id
//! ```

use clap::Parser;
use std::path::PathBuf;

use transit_gateway::config::{load_config, GatewayConfig};
use transit_gateway::lifecycle;
use transit_gateway::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "transit-gateway")]
#[command(about = "Resilience and audit gateway", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    init_logging(&config.observability.log_level);
    tracing::info!("transit-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        services = config.services.len(),
        admin_enabled = config.admin.enabled,
        "Configuration loaded"
    );

    lifecycle::start(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
