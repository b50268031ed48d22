//! The `Store` persistence boundary.
//!
//! `grid-store` provides the two implementations: a `SqliteStore`
//! backed by `sqlx`, and an in-memory `MemoryStore` test double. Both
//! live outside this crate to avoid a dependency cycle
//! (LotManager/Reconciler/Engine, here, only ever see `Arc<dyn Store>`),
//! mirroring the teacher's trait-boundary-with-simulated/real pattern
//! for `Executor`, just split across crates instead of files.

use crate::domain::{AuditLogEntry, Fill, Lot, LotId, Market, MarketId, Order, OrderId, OrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("no row found for {0}")]
    NotFound(String),
    #[error("unique constraint violated: {0}")]
    Conflict(String),
}

/// Durable state for markets, orders, fills, lots, bot state, config
/// overrides and the audit log. A confirmed exchange action that fails
/// to persist here is treated as fatal in correctness terms; callers
/// log ERROR and rely on the next reconciliation pass to repair state
/// from the exchange rather than retrying the write blindly.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_market(&self, id: &MarketId) -> Result<Option<Market>, StoreError>;
    async fn list_markets(&self, favorites_only: bool) -> Result<Vec<Market>, StoreError>;
    async fn upsert_market(&self, market: &Market) -> Result<(), StoreError>;
    /// The single currently-enabled market, if any — only one market
    /// may run at a time.
    async fn get_enabled_market(&self) -> Result<Option<Market>, StoreError>;

    async fn insert_order(&self, order: &Order) -> Result<(), StoreError>;
    async fn update_order(&self, order: &Order) -> Result<(), StoreError>;
    async fn get_order(&self, id: &OrderId) -> Result<Option<Order>, StoreError>;
    async fn get_order_by_client_tag(
        &self,
        client_tag: &crate::domain::ClientTag,
    ) -> Result<Option<Order>, StoreError>;
    async fn list_open_orders(&self, market_id: &MarketId) -> Result<Vec<Order>, StoreError>;
    async fn count_open_orders(&self) -> Result<u32, StoreError>;
    /// All orders for a market, optionally narrowed to a single status;
    /// `None` returns every order regardless of status, unlike
    /// `list_open_orders` which is always OPEN-only.
    async fn list_orders_by_status(
        &self,
        market_id: &MarketId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, StoreError>;

    /// Idempotent: re-inserting a fill with the same `id` is a no-op,
    /// since `stream_fills`/`get_fills` deliver at-least-once.
    async fn record_fill(&self, fill: &Fill) -> Result<bool, StoreError>;
    async fn list_fills(&self, limit: u32, skip: u32) -> Result<Vec<Fill>, StoreError>;

    async fn insert_lot(&self, lot: &Lot) -> Result<LotId, StoreError>;
    async fn update_lot(&self, lot: &Lot) -> Result<(), StoreError>;
    async fn get_lot(&self, id: LotId) -> Result<Option<Lot>, StoreError>;
    async fn get_lot_by_buy_order(&self, order_id: &OrderId) -> Result<Option<Lot>, StoreError>;
    async fn get_lot_by_sell_order(&self, order_id: &OrderId) -> Result<Option<Lot>, StoreError>;
    /// Lots whose SELL has not yet been placed on the exchange; a SELL
    /// is never abandoned, only retried on each subsequent tick.
    async fn list_lots_awaiting_sell(&self, market_id: &MarketId) -> Result<Vec<Lot>, StoreError>;
    async fn list_lots(&self, limit: u32, skip: u32) -> Result<Vec<Lot>, StoreError>;

    async fn get_bot_state(&self, market_id: &MarketId) -> Result<Option<crate::domain::BotState>, StoreError>;
    async fn put_bot_state(&self, state: &crate::domain::BotState) -> Result<(), StoreError>;

    async fn get_config(&self) -> Result<Option<crate::config::Config>, StoreError>;
    async fn put_config(&self, config: &crate::config::Config) -> Result<(), StoreError>;

    async fn append_audit_log(&self, entry: &AuditLogEntry) -> Result<(), StoreError>;

    /// Used by startup reconciliation's orphan-local check.
    async fn last_fill_at(&self, market_id: &MarketId) -> Result<Option<DateTime<Utc>>, StoreError>;
}
