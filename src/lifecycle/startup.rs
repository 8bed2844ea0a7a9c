//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Check the environment contract
//! - Initialize subsystems in dependency order
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - The listener binds last (traffic only when ready)

use std::net::SocketAddr;
use std::path::Path;

use tokio::net::TcpListener;

use crate::config::{load_or_default, PlatformEnv};
use crate::error::GatewayError;
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::observability::{logging, metrics};

/// Run the gateway until a shutdown signal arrives.
pub async fn run(config_path: Option<&Path>) -> Result<(), GatewayError> {
    let config = load_or_default(config_path)?;
    logging::init_tracing(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?config_path,
        endpoints = config.endpoints.iter().count(),
        "request-gateway starting"
    );

    let env = PlatformEnv::from_env(&config.environment.required)?;
    tracing::info!(upstream = %env.upstream_url, "Environment loaded");

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| GatewayError::Address(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr)?;
    }

    let server = HttpServer::new(&config, &env)?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    let _signal_task = shutdown.trigger_on_signal();
    server.run(listener, receiver).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
