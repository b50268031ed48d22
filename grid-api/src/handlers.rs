use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use grid_core::domain::{Actor, AuditLogEntry, Lot, MarketId, Order, OrderStatus};
use std::str::FromStr;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct BotStatus {
    env: String,
    live_trading: bool,
    exchange_type: String,
    paper_mode: bool,
    running: bool,
    active_markets: Vec<MarketId>,
}

pub async fn bot_status(State(state): State<AppState>) -> Result<Json<BotStatus>, ApiError> {
    let config = state.config.load();
    let enabled = state.store.get_enabled_market().await?;
    Ok(Json(BotStatus {
        env: state.env.clone(),
        live_trading: config.live_trading_enabled,
        exchange_type: state.exchange_type.clone(),
        paper_mode: config.paper_mode,
        running: enabled.is_some(),
        active_markets: enabled.into_iter().map(|m| m.id).collect(),
    }))
}

#[derive(Deserialize)]
pub struct FavoritesQuery {
    favorites_only: Option<bool>,
}

pub async fn list_markets(
    State(state): State<AppState>,
    Query(q): Query<FavoritesQuery>,
) -> Result<Json<Vec<grid_core::domain::Market>>, ApiError> {
    let markets = state.store.list_markets(q.favorites_only.unwrap_or(false)).await?;
    Ok(Json(markets))
}

#[derive(Serialize)]
pub struct PairPrice {
    product_id: MarketId,
    price: Decimal,
}

pub async fn all_pairs(State(state): State<AppState>) -> Result<Json<Vec<PairPrice>>, ApiError> {
    let products = state
        .engine
        .exchange_products()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let mut out = Vec::with_capacity(products.len());
    for p in products {
        if let Ok(price) = state.engine.exchange_ticker(&p.id).await {
            out.push(PairPrice { product_id: p.id, price });
        }
    }
    Ok(Json(out))
}

pub async fn favorite_market(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let market_id = MarketId::from(id);
    let mut market = state
        .store
        .get_market(&market_id)
        .await?
        .unwrap_or_else(|| grid_core::domain::Market::new(market_id.clone()));
    market.is_favorite = !market.is_favorite;
    state.store.upsert_market(&market).await?;
    Ok(StatusCode::OK)
}

pub async fn start_market(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    state.engine.start_market(&MarketId::from(id)).await?;
    Ok(StatusCode::OK)
}

pub async fn stop_market(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    state.engine.stop_market(&MarketId::from(id)).await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
pub struct MarketPatch {
    is_favorite: Option<bool>,
    ranking: Option<i32>,
}

pub async fn patch_market(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<MarketPatch>,
) -> Result<Json<grid_core::domain::Market>, ApiError> {
    let market_id = MarketId::from(id);
    let mut market = state
        .store
        .get_market(&market_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("market {market_id} not found")))?;
    if let Some(fav) = patch.is_favorite {
        market.is_favorite = fav;
    }
    if let Some(ranking) = patch.ranking {
        market.ranking = ranking;
    }
    state.store.upsert_market(&market).await?;
    Ok(Json(market))
}

#[derive(Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    skip: u32,
    status: Option<String>,
}

fn default_limit() -> u32 {
    100
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let enabled = state.store.get_enabled_market().await?;
    let Some(market) = enabled else {
        return Ok(Json(Vec::new()));
    };
    let status = q
        .status
        .map(|s| OrderStatus::from_str(&s))
        .transpose()
        .map_err(ApiError::bad_request)?;
    let orders = state.store.list_orders_by_status(&market.id, status).await?;
    let page = orders.into_iter().skip(q.skip as usize).take(q.limit as usize).collect();
    Ok(Json(page))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let order_id = grid_core::domain::OrderId(id);
    let order = state
        .store
        .get_order(&order_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("order {order_id} not found")))?;
    let canceled = state
        .engine
        .cancel_one(&order)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if canceled {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::not_found(format!("order {order_id} not open")))
    }
}

pub async fn list_lots(State(state): State<AppState>, Query(q): Query<PageQuery>) -> Result<Json<Vec<Lot>>, ApiError> {
    Ok(Json(state.store.list_lots(q.limit, q.skip).await?))
}

pub async fn list_fills(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Vec<grid_core::domain::Fill>>, ApiError> {
    Ok(Json(state.store.list_fills(q.limit, q.skip).await?))
}

pub async fn get_config(State(state): State<AppState>) -> Json<grid_core::config::Config> {
    Json((**state.config.load()).clone())
}

pub async fn put_config(
    State(state): State<AppState>,
    Json(new_config): Json<grid_core::config::Config>,
) -> Result<StatusCode, ApiError> {
    new_config.validate()?;
    let before = serde_json::to_value(&**state.config.load()).unwrap_or_default();
    state.store.put_config(&new_config).await?;
    state.config.store(std::sync::Arc::new(new_config.clone()));
    let after = serde_json::to_value(&new_config).unwrap_or_default();
    state
        .store
        .append_audit_log(&AuditLogEntry::new(Actor::User, "update_config", before, after))
        .await?;
    Ok(StatusCode::OK)
}

pub async fn cancel_all(State(state): State<AppState>) -> Result<Json<u32>, ApiError> {
    let Some(market) = state.store.get_enabled_market().await? else {
        return Ok(Json(0));
    };
    let canceled = state.engine.cancel_all(&market.id).await.map_err(ApiError::from)?;
    Ok(Json(canceled))
}

#[derive(Serialize)]
pub struct CapitalSummary {
    budget_usd: Decimal,
    deployed_usd: Decimal,
    available_usd: Decimal,
}

pub async fn capital_summary(State(state): State<AppState>) -> Result<Json<CapitalSummary>, ApiError> {
    let config = state.config.load();
    let open_orders = match state.store.get_enabled_market().await? {
        Some(m) => state.store.list_open_orders(&m.id).await?,
        None => Vec::new(),
    };
    let open_buy_notional_usd: Decimal = open_orders
        .iter()
        .filter(|o| o.side == grid_core::domain::Side::Buy)
        .map(|o| o.price * o.size)
        .sum();
    let lots = state.store.list_lots(10_000, 0).await?;
    let open_lot_cost_basis_usd: Decimal = lots
        .iter()
        .filter(|l| l.status != grid_core::domain::LotStatus::Closed)
        .map(|l| l.buy_price * l.buy_size)
        .sum();
    let deployed = open_buy_notional_usd + open_lot_cost_basis_usd;
    Ok(Json(CapitalSummary {
        budget_usd: config.budget_usd,
        deployed_usd: deployed,
        available_usd: config.budget_usd - deployed,
    }))
}

#[derive(Serialize)]
pub struct PnlBreakdown {
    realized_usd: Decimal,
    open_lot_count: usize,
    closed_lot_count: usize,
}

pub async fn pnl_breakdown(State(state): State<AppState>) -> Result<Json<PnlBreakdown>, ApiError> {
    let lots = state.store.list_lots(100_000, 0).await?;
    let realized_usd = lots.iter().filter_map(|l| l.realized_pnl).sum();
    let closed_lot_count = lots.iter().filter(|l| l.status == grid_core::domain::LotStatus::Closed).count();
    Ok(Json(PnlBreakdown {
        realized_usd,
        open_lot_count: lots.len() - closed_lot_count,
        closed_lot_count,
    }))
}

#[derive(Deserialize)]
pub struct DaysQuery {
    #[serde(default = "default_days")]
    days: i64,
}

fn default_days() -> i64 {
    30
}

#[derive(Serialize)]
pub struct DailyPnl {
    date: String,
    realized_usd: Decimal,
}

pub async fn pnl_history(
    State(state): State<AppState>,
    Query(q): Query<DaysQuery>,
) -> Result<Json<Vec<DailyPnl>>, ApiError> {
    let cutoff = chrono::Utc::now() - chrono::Duration::days(q.days);
    let lots = state.store.list_lots(100_000, 0).await?;
    let mut by_day: std::collections::BTreeMap<String, Decimal> = std::collections::BTreeMap::new();
    for lot in lots {
        let (Some(sell_time), Some(pnl)) = (lot.sell_time, lot.realized_pnl) else {
            continue;
        };
        if sell_time < cutoff {
            continue;
        }
        let key = sell_time.format("%Y-%m-%d").to_string();
        *by_day.entry(key).or_insert(Decimal::ZERO) += pnl;
    }
    Ok(Json(
        by_day
            .into_iter()
            .map(|(date, realized_usd)| DailyPnl { date, realized_usd })
            .collect(),
    ))
}
