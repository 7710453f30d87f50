//! Startup orchestration.
//!
//! Listeners are bound before any task is spawned, so a bad address fails
//! fast without leaving background work behind.

use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::http::HttpServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::shutdown_signal;
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

async fn bind(address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.to_string(),
            source,
        })
}

/// Run the gateway until a shutdown signal arrives.
pub async fn start(config: GatewayConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let gateway = Gateway::builder(config).build();
    start_with(gateway).await
}

/// Run an already assembled gateway until a shutdown signal arrives.
pub async fn start_with(gateway: Gateway) -> Result<(), StartupError> {
    let config = gateway.config().clone();

    let listener = bind(&config.listener.bind_address).await?;
    let admin_listener = if config.admin.enabled {
        Some(bind(&config.admin.bind_address).await?)
    } else {
        None
    };

    let shutdown = Shutdown::new();
    let mut tasks = Vec::new();

    if config.audit.enabled && config.audit.checkpoint_enabled {
        let scheduler = gateway.checkpoint_scheduler();
        let rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move { scheduler.run(rx).await }));
    }

    if let Some(admin_listener) = admin_listener {
        let server = HttpServer::new("admin", gateway.admin_router());
        let rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = server.run(admin_listener, rx).await {
                tracing::error!(error = %e, "Admin server failed");
            }
        }));
    }

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_shutdown.trigger();
    });

    let server = HttpServer::new("gateway", gateway.router());
    let result = server.run(listener, shutdown.subscribe()).await;

    // The main server may also stop on error; take the rest down with it.
    shutdown.trigger();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Background task ended abnormally");
        }
    }

    result.map_err(StartupError::from)
}
