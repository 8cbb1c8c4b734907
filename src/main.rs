//! meteo-relay - MQTT telemetry fan-out daemon
//!
//! Usage:
//!   meteo-relay
//!
//! Configuration is read from the file named by `METEO_RELAY_CONFIG`
//! (default `meteo-relay.toml`), falling back to a built-in document.
//! `RUST_LOG` overrides the configured log level.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use meteo_relay::config::Config;
use meteo_relay::relay::RelayEngine;
use meteo_relay::sink::{SinkManager, SinkRegistry};
use meteo_relay::source::SourceManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!(
                "Error loading config file {}: {}",
                Config::path_from_env().display(),
                e
            );
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(env_filter)
        .init();

    info!("Starting meteo-relay v{}", env!("CARGO_PKG_VERSION"));
    config.log_summary();

    let registry = Arc::new(SinkRegistry::new(config.sink.clone()));
    let sinks = Arc::new(SinkManager::connect_all(registry.descriptors()));
    if sinks.is_empty() {
        warn!("No sinks configured; readings will only be logged");
    }

    let engine = Arc::new(RelayEngine::new(registry, sinks.clone()));

    let mut source = SourceManager::new(config.source.clone());
    let relay = engine.clone();
    source.on_message(move |topic, payload| {
        relay.handle_message(topic, payload);
    });

    if let Err(e) = source.connect() {
        error!("Failed to start source connection: {}", e);
        sinks.disconnect_all().await;
        std::process::exit(1);
    }

    info!("Relay running, press Ctrl+C to stop");
    shutdown_signal().await?;

    info!("Shutting down...");
    source.disconnect().await;
    sinks.disconnect_all().await;
    info!("Shutdown complete");

    Ok(())
}

/// Wait for Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
