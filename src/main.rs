//! Detection engine service entry point

use anyhow::Result;
use siem_detection_engine::config::Config;
use siem_detection_engine::state::{spawn_state_refresh, EngineState};
use siem_detection_engine::{handlers, loader};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "siem_detection_engine=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting SIEM Detection Engine");

    let config = Config::load_with_overrides()?;
    info!("Configuration loaded successfully");
    info!("Server will listen on: {}", config.server.bind_address);
    info!("Rules directory: {}", config.rules.directory);
    info!("Rule-state store: {}", config.state_store.base_url);

    let bind_address = config.server.bind_address;
    let state = EngineState::new(config);

    // Startup sequence runs in the background so the server answers
    // health checks as "starting" while the corpus comes up.
    let startup_state = state.clone();
    let startup_handle = tokio::spawn(async move {
        let delay = startup_state.config.rules.startup_delay_secs;
        if delay > 0 {
            info!("Waiting {}s for the corpus provisioner before first load", delay);
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
        startup_state.store.seed_with_retries().await;
        let load = loader::load_with_retries(&startup_state).await;
        info!(
            "Initial rule load finished after {} attempt(s): {} rules, {} files skipped",
            load.attempts, load.loaded, load.skipped
        );
    });

    // Periodic reconciliation with the authoritative rule-state store
    let refresh_handle = spawn_state_refresh(state.clone());

    let app = handlers::build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("HTTP server listening on {}", bind_address);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal, gracefully shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    server_handle.abort();
    refresh_handle.abort();
    startup_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
