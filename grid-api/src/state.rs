use arc_swap::ArcSwap;
use grid_core::{Config, Engine, EventBus, Store};
use std::sync::Arc;

/// Everything an axum handler needs, cloned cheaply per request (every
/// field is an `Arc`). `grid-bins` constructs one of these at startup
/// and hands it to `router()`.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub store: Arc<dyn Store>,
    pub config: Arc<ArcSwap<Config>>,
    pub events: Arc<EventBus>,
    pub env: String,
    pub exchange_type: String,
}
