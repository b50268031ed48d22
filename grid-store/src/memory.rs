//! In-memory `Store` test double, matching the teacher's
//! pattern of a trait boundary backed by both a "simulated" and a real
//! implementation — here, `MemoryStore` plays the role the teacher's
//! `SimulatedExecutor` plays for `Executor`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use grid_core::config::Config;
use grid_core::domain::{
    AuditLogEntry, BotState, ClientTag, Fill, Lot, LotId, LotStatus, Market, MarketId, Order, OrderId, OrderStatus,
};
use grid_core::store::{Store, StoreError};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    markets: DashMap<MarketId, Market>,
    orders: DashMap<OrderId, Order>,
    fills: DashMap<String, Fill>,
    lots: DashMap<i64, Lot>,
    next_lot_id: AtomicI64,
    bot_state: DashMap<MarketId, BotState>,
    config: Mutex<Option<Config>>,
    audit_log: Mutex<Vec<AuditLogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_lot_id: AtomicI64::new(1),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_market(&self, id: &MarketId) -> Result<Option<Market>, StoreError> {
        Ok(self.markets.get(id).map(|m| m.clone()))
    }

    async fn list_markets(&self, favorites_only: bool) -> Result<Vec<Market>, StoreError> {
        Ok(self
            .markets
            .iter()
            .map(|m| m.clone())
            .filter(|m| !favorites_only || m.is_favorite)
            .collect())
    }

    async fn upsert_market(&self, market: &Market) -> Result<(), StoreError> {
        if market.enabled {
            let conflict = self
                .markets
                .iter()
                .any(|m| m.enabled && m.id != market.id);
            if conflict {
                return Err(StoreError::Conflict(
                    "another market is already enabled (Highlander)".into(),
                ));
            }
        }
        self.markets.insert(market.id.clone(), market.clone());
        Ok(())
    }

    async fn get_enabled_market(&self) -> Result<Option<Market>, StoreError> {
        Ok(self.markets.iter().find(|m| m.enabled).map(|m| m.clone()))
    }

    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        if self.orders.iter().any(|o| o.client_tag == order.client_tag) {
            return Err(StoreError::Conflict(format!(
                "client_tag {} already exists",
                order.client_tag
            )));
        }
        self.orders.insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<(), StoreError> {
        self.orders.insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn get_order(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.get(id).map(|o| o.clone()))
    }

    async fn get_order_by_client_tag(&self, client_tag: &ClientTag) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.iter().find(|o| &o.client_tag == client_tag).map(|o| o.clone()))
    }

    async fn list_open_orders(&self, market_id: &MarketId) -> Result<Vec<Order>, StoreError> {
        Ok(self
            .orders
            .iter()
            .filter(|o| &o.market_id == market_id && o.status.is_open())
            .map(|o| o.clone())
            .collect())
    }

    async fn count_open_orders(&self) -> Result<u32, StoreError> {
        Ok(self.orders.iter().filter(|o| o.status.is_open()).count() as u32)
    }

    async fn list_orders_by_status(
        &self,
        market_id: &MarketId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, StoreError> {
        Ok(self
            .orders
            .iter()
            .filter(|o| &o.market_id == market_id && status.map_or(true, |s| o.status == s))
            .map(|o| o.clone())
            .collect())
    }

    async fn record_fill(&self, fill: &Fill) -> Result<bool, StoreError> {
        if self.fills.contains_key(&fill.id) {
            return Ok(false);
        }
        self.fills.insert(fill.id.clone(), fill.clone());
        Ok(true)
    }

    async fn list_fills(&self, limit: u32, skip: u32) -> Result<Vec<Fill>, StoreError> {
        let mut all: Vec<Fill> = self.fills.iter().map(|f| f.clone()).collect();
        all.sort_by_key(|f| f.timestamp);
        Ok(all.into_iter().skip(skip as usize).take(limit as usize).collect())
    }

    async fn insert_lot(&self, lot: &Lot) -> Result<LotId, StoreError> {
        let id = LotId(self.next_lot_id.fetch_add(1, Ordering::SeqCst));
        let mut stored = lot.clone();
        stored.id = id;
        self.lots.insert(id.0, stored);
        Ok(id)
    }

    async fn update_lot(&self, lot: &Lot) -> Result<(), StoreError> {
        self.lots.insert(lot.id.0, lot.clone());
        Ok(())
    }

    async fn get_lot(&self, id: LotId) -> Result<Option<Lot>, StoreError> {
        Ok(self.lots.get(&id.0).map(|l| l.clone()))
    }

    async fn get_lot_by_buy_order(&self, order_id: &OrderId) -> Result<Option<Lot>, StoreError> {
        Ok(self.lots.iter().find(|l| &l.buy_order_id == order_id).map(|l| l.clone()))
    }

    async fn get_lot_by_sell_order(&self, order_id: &OrderId) -> Result<Option<Lot>, StoreError> {
        Ok(self
            .lots
            .iter()
            .find(|l| l.sell_order_id.as_ref() == Some(order_id))
            .map(|l| l.clone()))
    }

    async fn list_lots_awaiting_sell(&self, market_id: &MarketId) -> Result<Vec<Lot>, StoreError> {
        Ok(self
            .lots
            .iter()
            .filter(|l| &l.market_id == market_id && l.status == LotStatus::Open)
            .map(|l| l.clone())
            .collect())
    }

    async fn list_lots(&self, limit: u32, skip: u32) -> Result<Vec<Lot>, StoreError> {
        let mut all: Vec<Lot> = self.lots.iter().map(|l| l.clone()).collect();
        all.sort_by_key(|l| l.buy_time);
        Ok(all.into_iter().skip(skip as usize).take(limit as usize).collect())
    }

    async fn get_bot_state(&self, market_id: &MarketId) -> Result<Option<BotState>, StoreError> {
        Ok(self.bot_state.get(market_id).map(|s| s.clone()))
    }

    async fn put_bot_state(&self, state: &BotState) -> Result<(), StoreError> {
        self.bot_state.insert(state.market_id.clone(), state.clone());
        Ok(())
    }

    async fn get_config(&self) -> Result<Option<Config>, StoreError> {
        Ok(self.config.lock().expect("config mutex poisoned").clone())
    }

    async fn put_config(&self, config: &Config) -> Result<(), StoreError> {
        *self.config.lock().expect("config mutex poisoned") = Some(config.clone());
        Ok(())
    }

    async fn append_audit_log(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        self.audit_log.lock().expect("audit log mutex poisoned").push(entry.clone());
        Ok(())
    }

    async fn last_fill_at(&self, market_id: &MarketId) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .fills
            .iter()
            .filter(|f| &f.market_id == market_id)
            .map(|f| f.timestamp)
            .max())
    }
}
