//! Shared scaffolding for the integration tests in this directory.
#![allow(dead_code)]

use arc_swap::ArcSwap;
use grid_core::config::Config;
use grid_core::domain::MarketId;
use grid_core::exchange::Product;
use grid_core::{Engine, EventBus, Store};
use grid_exchange::MockAdapter;
use grid_store::MemoryStore;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub fn market(id: &str) -> MarketId {
    MarketId::from(id)
}

pub fn product_for(id: &MarketId) -> Product {
    Product {
        id: id.clone(),
        base_increment: dec!(0.00001),
        quote_increment: dec!(0.01),
        min_size: dec!(0.0001),
    }
}

pub fn default_config() -> Config {
    Config::default()
}

/// Single-market engine wired against a fresh `MemoryStore` + `MockAdapter`.
pub fn setup(config: Config, market_id: &MarketId) -> (Arc<Engine>, Arc<MockAdapter>, Arc<MemoryStore>) {
    setup_multi(config, &[market_id.clone()])
}

/// Multi-market engine, for Highlander and reconciliation scenarios
/// that need more than one product registered on the exchange.
pub fn setup_multi(config: Config, markets: &[MarketId]) -> (Arc<Engine>, Arc<MockAdapter>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let products: Vec<Product> = markets.iter().map(product_for).collect();
    let exchange = Arc::new(MockAdapter::new(products));
    let events = Arc::new(EventBus::new());
    let config = Arc::new(ArcSwap::from_pointee(config));
    let engine = Arc::new(Engine::new(
        config,
        store.clone() as Arc<dyn Store>,
        exchange.clone() as Arc<dyn grid_core::ExchangeAdapter>,
        events,
    ));
    (engine, exchange, store)
}
