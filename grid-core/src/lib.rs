//! Core domain, planning, risk and orchestration logic for a laddered
//! grid-trading bot.
//!
//! This crate has no knowledge of any specific exchange or storage
//! backend: `ExchangeAdapter` (exchange.rs) and `Store` (store.rs) are
//! capability traits implemented downstream by `grid-exchange` and
//! `grid-store`. `grid-api` and `grid-bins` wire concrete
//! implementations into an `Engine` and drive it.

pub mod config;
pub mod domain;
pub mod engine;
pub mod event_bus;
pub mod exchange;
pub mod grid_planner;
pub mod lot_manager;
pub mod reconciler;
pub mod resilience;
pub mod risk;
pub mod store;

pub use config::Config;
pub use engine::{Engine, EngineError, EngineStats};
pub use event_bus::{Event, EventBus};
pub use exchange::ExchangeAdapter;
pub use store::Store;
