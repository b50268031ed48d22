//! The `ExchangeAdapter` capability boundary.
//!
//! The engine is polymorphic over this trait (`Arc<dyn ExchangeAdapter>`)
//! and never imports a concrete adapter; `grid-exchange` provides the
//! `MockAdapter` and `CoinbaseAdapter` implementations. Unlike the teacher
//! crate's const-generic `Strategy`/`Executor` traits (chosen there for a
//! nanosecond hot path), dynamic dispatch costs nothing at this engine's
//! multi-second tick cadence, so a trait object is used instead.

use crate::domain::{Fill, MarketId, Order, OrderId, Side};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: MarketId,
    pub base_increment: Decimal,
    pub quote_increment: Decimal,
    pub min_size: Decimal,
}

/// Transient vs. permanent split drives the retry policy: transient
/// errors get exponential backoff, permanent ones surface immediately.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExchangeError {
    #[error("transient exchange error: {reason}")]
    Transient { reason: String },
    #[error("permanent exchange error: {reason}")]
    Permanent { reason: String },
    #[error("order {0} not found")]
    NotFound(OrderId),
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl ExchangeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Transient { .. } | ExchangeError::Timeout(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Ok,
    NotFound,
}

/// Price tick delivered by `stream_ticker`.
#[derive(Debug, Clone, Copy)]
pub struct TickerUpdate {
    pub price: Decimal,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl fmt::Display for TickerUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.price, self.timestamp)
    }
}

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn get_products(&self) -> Result<Vec<Product>, ExchangeError>;

    async fn get_balances(&self) -> Result<std::collections::HashMap<String, Decimal>, ExchangeError>;

    async fn get_ticker(&self, market_id: &MarketId) -> Result<Decimal, ExchangeError>;

    /// Idempotent by `client_tag`: repeated calls with the same tag return
    /// the same `OrderId` without creating a duplicate order.
    #[allow(clippy::too_many_arguments)]
    async fn place_limit_order(
        &self,
        market_id: &MarketId,
        side: Side,
        price: Decimal,
        size: Decimal,
        client_tag: &crate::domain::ClientTag,
        post_only: bool,
    ) -> Result<OrderId, ExchangeError>;

    async fn cancel_order(&self, order_id: &OrderId) -> Result<CancelOutcome, ExchangeError>;

    async fn list_open_orders(&self, market_id: Option<&MarketId>) -> Result<Vec<Order>, ExchangeError>;

    async fn get_fills(&self, since: chrono::DateTime<chrono::Utc>) -> Result<Vec<Fill>, ExchangeError>;

    /// `true` when this adapter is a paper-trading simulation (used by
    /// RiskGovernor-adjacent checks and by the status API).
    fn is_paper(&self) -> bool;

    fn name(&self) -> &'static str;
}
