//! Single entry point for the grid engine: loads `Settings` from the
//! environment, wires Store + ExchangeAdapter + Engine + the axum API
//! together, and runs the tick loop and HTTP server side by side until
//! SIGINT/SIGTERM.

use anyhow::Result;
use arc_swap::ArcSwap;
use grid_bins::common::{build_exchange, init_logging, Settings};
use grid_core::{Config, Engine, EventBus};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env()?;
    init_logging(&settings.log_level)?;

    info!(env = %settings.env, exchange = ?settings.exchange_type, "starting grid-server");
    if settings.live_trading_enabled && !settings.paper_mode {
        tracing::warn!("LIVE TRADING ENABLED - real funds are at risk");
    }

    let store: Arc<dyn grid_core::Store> = Arc::new(grid_store::SqliteStore::connect(&settings.database_url).await?);
    let exchange = build_exchange(&settings).await?;

    let mut config = store.get_config().await?.unwrap_or_default();
    config.live_trading_enabled = settings.live_trading_enabled;
    config.paper_mode = settings.paper_mode;
    config.validate()?;
    store.put_config(&config).await?;
    let config = Arc::new(ArcSwap::from_pointee(config));

    let events = Arc::new(EventBus::new());
    let engine = Arc::new(Engine::new(config.clone(), store.clone(), exchange.clone(), events.clone()));

    let shutdown = engine.shutdown_signal();
    ctrlc::set_handler(move || {
        info!("shutdown signal received");
        shutdown.store(true, Ordering::SeqCst);
    })?;

    let app_state = grid_api::AppState {
        engine: engine.clone(),
        store: store.clone(),
        config: config.clone(),
        events: events.clone(),
        env: settings.env.clone(),
        exchange_type: format!("{:?}", settings.exchange_type),
    };
    let app = grid_api::router(app_state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!(addr = %settings.bind_addr, "listening");

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "http server exited with error");
            }
        }
        stats = engine.run() => {
            info!(ticks = stats.ticks, failed = stats.failed_ticks, "engine loop exited");
        }
    }

    Ok(())
}
