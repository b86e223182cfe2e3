//! # Pitwall Live Server
//!
//! WebSocket front door of the live race engine. Clients connect to `/ws`,
//! subscribe to a topic for one session and receive raw snapshots plus the
//! race events detected from them.
//!
//! ## Routes:
//! - `/ws`: subscribe/unsubscribe protocol, outbound snapshots and events.
//! - `/health`: liveness probe.
//! - `GET /sessions/{id}/events`: recent detected events of a session.
//! - `DELETE /sessions/{id}`: forget a session and detach its connections.
//!
//! Configuration is layered defaults → `server_pitwall.conf` → env/CLI.
//! TLS is enabled when both certificate files exist.

#![forbid(unsafe_code)]

use anyhow::Result;
use lib_pitwall::LiveEngine;
use lib_pitwall::core::ConnectionHub;
use lib_pitwall::ingestors::OpenF1Source;
use std::sync::Arc;
use tokio::signal;

mod pitwall_logic;
use pitwall_logic::{config, downstream, logger, state};

#[tokio::main]
async fn main() -> Result<()> {
    // Rustls 0.23+ requires an explicit crypto provider.
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // .env must be loaded before clap reads the environment
    dotenvy::dotenv().ok();
    let config = config::load_config();
    logger::setup_logging(&config.log_dir(), config.log_level())?;
    log::info!("Pitwall server booting at {}", chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));

    let hub = Arc::new(ConnectionHub::new());
    let source = Arc::new(OpenF1Source::new(&config.openf1_config())?);
    let engine = LiveEngine::new(config.engine_config(), source, hub.clone());
    engine.start_idle_sweeper();

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let mut downstream_handle = tokio::spawn(downstream::run(
        config.clone(),
        state::AppState::new(engine.clone(), hub),
        shutdown_tx.subscribe(),
    ));

    tokio::select! {
        _ = shutdown_signal() => {
            log::warn!("Shutdown signal received, closing server gracefully.");
        }
        // The server ended on its own, most likely a bind or TLS failure.
        served = &mut downstream_handle => {
            engine.shutdown();
            return served?;
        }
    }

    let _ = shutdown_tx.send(());
    engine.shutdown();
    downstream_handle.await??;

    log::info!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
