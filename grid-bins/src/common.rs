//! Shared environment loading and logging setup for the grid-bins binaries.

use anyhow::{Context, Result};
use std::env;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    Mock,
    Coinbase,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub env: String,
    pub log_level: String,
    pub exchange_type: ExchangeType,
    pub coinbase_api_key: Option<String>,
    pub coinbase_api_secret: Option<String>,
    pub live_trading_enabled: bool,
    pub paper_mode: bool,
    pub database_url: String,
    pub bind_addr: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let exchange_type = match env::var("EXCHANGE_TYPE").unwrap_or_else(|_| "mock".into()).as_str() {
            "coinbase" => ExchangeType::Coinbase,
            "mock" => ExchangeType::Mock,
            other => anyhow::bail!("EXCHANGE_TYPE must be 'coinbase' or 'mock', got '{other}'"),
        };

        Ok(Self {
            env: env::var("ENV").unwrap_or_else(|_| "development".into()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            exchange_type,
            coinbase_api_key: env::var("COINBASE_API_KEY").ok(),
            coinbase_api_secret: env::var("COINBASE_API_SECRET").ok(),
            live_trading_enabled: parse_bool_env("LIVE_TRADING_ENABLED", false),
            paper_mode: parse_bool_env("PAPER_MODE", true),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://grid.db".into()),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".into()),
        })
    }
}

fn parse_bool_env(key: &str, default: bool) -> bool {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    Ok(())
}

pub async fn build_exchange(settings: &Settings) -> Result<std::sync::Arc<dyn grid_core::exchange::ExchangeAdapter>> {
    match settings.exchange_type {
        ExchangeType::Mock => {
            let products = vec![grid_core::exchange::Product {
                id: grid_core::domain::MarketId::from("BTC-USD"),
                base_increment: rust_decimal_macros::dec!(0.00000001),
                quote_increment: rust_decimal_macros::dec!(0.01),
                min_size: rust_decimal_macros::dec!(0.0001),
            }];
            Ok(std::sync::Arc::new(grid_exchange::MockAdapter::new(products)))
        }
        ExchangeType::Coinbase => {
            let key = settings
                .coinbase_api_key
                .clone()
                .context("COINBASE_API_KEY must be set when EXCHANGE_TYPE=coinbase")?;
            let secret = settings
                .coinbase_api_secret
                .clone()
                .context("COINBASE_API_SECRET must be set when EXCHANGE_TYPE=coinbase")?;
            Ok(std::sync::Arc::new(grid_exchange::CoinbaseAdapter::new(key, secret)))
        }
    }
}
