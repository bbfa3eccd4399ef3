//! Relay Server Application
//!
//! Accepts voice clients over TCP and relays voice, chat and presence
//! within rooms. Optionally serves the admin HTTP API.
//!
//! Usage: `relay-server [CONFIG_PATH]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

use lan_voice_rooms::{
    api::{serve_api, AppState},
    config::AppConfig,
    logging::init_logging,
    network::RelayServer,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.logging);

    tracing::info!("Starting LAN voice relay");

    let server = RelayServer::new(config.server.clone());
    let listener = server.bind().await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let api_task = match config.server.http_address() {
        Some(addr) => {
            let api_listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind admin API on {}", addr))?;
            let state = Arc::new(AppState::for_server(&server));
            Some(tokio::spawn(serve_api(api_listener, state, shutdown_rx.clone())))
        }
        None => {
            tracing::info!("Admin API disabled");
            None
        }
    };

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C"),
        }
        let _ = shutdown_tx.send(true);
    });

    server.serve(listener, shutdown_rx).await?;

    if let Some(task) = api_task {
        match task.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "Admin API stopped with error"),
            Err(e) => tracing::warn!(error = %e, "Admin API task failed"),
            Ok(Ok(())) => {}
        }
    }

    tracing::info!("Relay stopped");
    Ok(())
}
