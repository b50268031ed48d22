//! Domain entities for the grid-trading engine.
//!
//! These are flat, serializable rows mirroring the persisted schema
//! (see `grid-store`). Cyclic references (Order <-> Lot) are modeled
//! as nullable foreign keys rather than back-pointers; traversal goes
//! through the `Store`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange product identifier, e.g. "BTC-USD".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketId(pub String);

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MarketId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MarketId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Caller-supplied idempotency key for `place_limit_order`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientTag(pub String);

impl fmt::Display for ClientTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ClientTag {
    /// Tag for a grid buy at a given price, quantized to the market's
    /// quote increment. Identity is keyed on price, not on a
    /// recomputed-each-tick position-from-top, so the band actually
    /// re-prices as the market moves: a level whose price shifts gets a
    /// new tag (and is pruned/re-placed), while a level still at the
    /// same price keeps the same tag and is left alone.
    pub fn for_buy_level(market: &MarketId, quantized_price: Decimal) -> Self {
        Self(format!("buy-{}-{}", market.0, quantized_price.normalize()))
    }

    /// Tag for the sell paired with a lot: `sell-<lot_id>`.
    pub fn for_sell(lot_id: LotId) -> Self {
        Self(format!("sell-{}", lot_id.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LotId(pub i64);

impl fmt::Display for LotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exchange-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    PendingPlace,
    Open,
    Filled,
    Canceled,
    Rejected,
    Unknown,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected
        )
    }

    pub fn is_open(self) -> bool {
        matches!(self, OrderStatus::Open)
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING_PLACE" => Ok(OrderStatus::PendingPlace),
            "OPEN" => Ok(OrderStatus::Open),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELED" => Ok(OrderStatus::Canceled),
            "REJECTED" => Ok(OrderStatus::Rejected),
            "UNKNOWN" => Ok(OrderStatus::Unknown),
            other => Err(format!("unrecognized order status {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub client_tag: ClientTag,
    pub market_id: MarketId,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub lot_id: Option<LotId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub id: String,
    pub order_id: OrderId,
    pub market_id: MarketId,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotStatus {
    Open,
    SellPlaced,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lot {
    pub id: LotId,
    pub market_id: MarketId,
    pub buy_order_id: OrderId,
    pub buy_price: Decimal,
    pub buy_size: Decimal,
    pub buy_fee: Decimal,
    pub buy_time: DateTime<Utc>,
    pub sell_order_id: Option<OrderId>,
    pub sell_price: Option<Decimal>,
    pub sell_time: Option<DateTime<Utc>>,
    pub realized_pnl: Option<Decimal>,
    pub status: LotStatus,
}

impl Lot {
    pub fn new_open(
        market_id: MarketId,
        buy_order_id: OrderId,
        buy_price: Decimal,
        buy_size: Decimal,
        buy_fee: Decimal,
        buy_time: DateTime<Utc>,
        id: LotId,
    ) -> Self {
        Self {
            id,
            market_id,
            buy_order_id,
            buy_price,
            buy_size,
            buy_fee,
            buy_time,
            sell_order_id: None,
            sell_price: None,
            sell_time: None,
            realized_pnl: None,
            status: LotStatus::Open,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub enabled: bool,
    pub is_favorite: bool,
    pub ranking: i32,
    pub settings: serde_json::Value,
}

impl Market {
    pub fn new(id: MarketId) -> Self {
        Self {
            id,
            enabled: false,
            is_favorite: false,
            ranking: 0,
            settings: serde_json::Value::Null,
        }
    }
}

/// Engine state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineMode {
    Running,
    Paused,
    Hold,
    Stopped,
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineMode::Running => write!(f, "RUNNING"),
            EngineMode::Paused => write!(f, "PAUSED"),
            EngineMode::Hold => write!(f, "HOLD"),
            EngineMode::Stopped => write!(f, "STOPPED"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotState {
    pub market_id: MarketId,
    pub anchor_high: Decimal,
    pub mode: EngineMode,
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl BotState {
    pub fn new(market_id: MarketId, initial_price: Decimal) -> Self {
        Self {
            market_id,
            anchor_high: initial_price,
            mode: EngineMode::Stopped,
            last_tick_at: None,
        }
    }

    /// Anchor is non-decreasing (I2); returns true if it actually moved.
    pub fn update_anchor(&mut self, price: Decimal) -> bool {
        if price > self.anchor_high {
            self.anchor_high = price;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    System,
    User,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::System => write!(f, "system"),
            Actor::User => write!(f, "user"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub action: String,
    pub before: serde_json::Value,
    pub after: serde_json::Value,
}

impl AuditLogEntry {
    pub fn new(actor: Actor, action: impl Into<String>, before: serde_json::Value, after: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            actor,
            action: action.into(),
            before,
            after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn anchor_never_decreases() {
        let mut state = BotState::new(MarketId::from("BTC-USD"), dec!(100));
        assert!(state.update_anchor(dec!(105)));
        assert_eq!(state.anchor_high, dec!(105));
        assert!(!state.update_anchor(dec!(101)));
        assert_eq!(state.anchor_high, dec!(105));
    }

    #[test]
    fn client_tag_for_sell_is_stable() {
        let tag = ClientTag::for_sell(LotId(42));
        assert_eq!(tag.0, "sell-42");
    }

    #[test]
    fn order_status_terminal_classification() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Open.is_terminal());
        assert!(!OrderStatus::PendingPlace.is_terminal());
    }
}
