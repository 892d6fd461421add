//! Entry point for the quote relay daemon.
//! Slim bootstrap: load config, wire the engine, warm up, serve HTTP,
//! drain gracefully on SIGINT/SIGTERM.

use anyhow::{Context, Result};
use quote_relay::config::RelayConfig;
use quote_relay::engine::{Engine, ShutdownCoordinator};
use quote_relay::store::MemoryQuoteStore;
use quote_relay::tiers::TierConfig;
use quote_relay::upstream::RouterApiClient;
use quote_relay::{server, sweeper, worker};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path =
        std::env::var("QUOTE_RELAY_CONFIG").unwrap_or_else(|_| "quote-relay.toml".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        let config = RelayConfig::from_toml_file(&config_path)?;
        config.init_logging();
        tracing::info!(path = %config_path, "Loaded config");
        config
    } else {
        let mut config = RelayConfig::default();
        config.apply_env_overrides();
        config.init_logging();
        tracing::info!("No config file found, using defaults");
        config
    };

    tracing::info!("Starting quote-relay");

    let store = Arc::new(MemoryQuoteStore::new(config.store.max_entries));
    let source = Arc::new(
        RouterApiClient::new(config.router_config())
            .context("Failed to initialize router client")?,
    );
    let engine = Engine::new(
        config.engine_config()?,
        TierConfig::default(),
        config.breaker_config(),
        store,
        source,
    )
    .context("Failed to initialize engine")?;

    let cancel = engine.cancel_token();
    let mut shutdown = ShutdownCoordinator::new(cancel.clone());
    shutdown.extend(worker::spawn_workers(engine.clone()));
    shutdown.extend(sweeper::spawn_sweepers(engine.clone()));

    // Warm-up is best-effort and must not block startup on failures.
    engine.warm_up().await;

    let server_cancel = cancel.clone();
    let signal = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate_signal() => {}
            _ = server_cancel.cancelled() => {}
        }
        tracing::info!("Shutdown signal received, draining requests");
    };

    server::serve(engine.clone(), &config.listen_addr, signal).await?;

    shutdown.shutdown(config.shutdown_grace()).await;
    Ok(())
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}
