//! axum HTTP/WebSocket surface in front of the grid engine. A thin
//! router delegating to `AppState`'s `Engine`/`Store`/`Config` handles;
//! `grid-bins` constructs the state and calls `router()`.

mod error;
mod handlers;
mod state;
mod ws;

pub use state::AppState;

use axum::routing::{delete, get, patch, post};
use axum::Router;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/bot/status", get(handlers::bot_status))
        .route("/api/markets/", get(handlers::list_markets))
        .route("/api/markets/all-pairs", get(handlers::all_pairs))
        .route("/api/markets/:id/favorite", post(handlers::favorite_market))
        .route("/api/markets/:id/start", post(handlers::start_market))
        .route("/api/markets/:id/stop", post(handlers::stop_market))
        .route("/api/markets/:id", patch(handlers::patch_market))
        .route("/api/orders/", get(handlers::list_orders))
        .route("/api/orders/:id", delete(handlers::cancel_order))
        .route("/api/lots/", get(handlers::list_lots))
        .route("/api/history/fills", get(handlers::list_fills))
        .route("/api/config/", get(handlers::get_config).post(handlers::put_config))
        .route("/api/control/cancel_all", post(handlers::cancel_all))
        .route("/api/stats/capital-summary", get(handlers::capital_summary))
        .route("/api/stats/pnl-breakdown", get(handlers::pnl_breakdown))
        .route("/api/stats/pnl-history", get(handlers::pnl_history))
        .route("/api/ws", get(ws::ws_upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().on_request(
            tower_http::trace::DefaultOnRequest::new().level(tracing::Level::DEBUG),
        ))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}
