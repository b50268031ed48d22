//! BUY-fill to paired-SELL lifecycle management.
//!
//! `LotManager` is the only component allowed to create or close a
//! `Lot`. It never prunes a Lot whose SELL failed to place; the caller
//! is expected to call `retry_unplaced_sells` once per tick so a SELL
//! is retried until it succeeds, matching the teacher's retry-until-ack
//! posture for order submission in `execution::production`.

use crate::config::{Config, ProfitMode};
use crate::domain::{ClientTag, Fill, Lot, LotId, LotStatus, Side};
use crate::exchange::ExchangeAdapter;
use crate::grid_planner::GridPlanner;
use crate::resilience::ExponentialBackoff;
use crate::store::{Store, StoreError};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum LotManagerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("exchange error: {0}")]
    Exchange(#[from] crate::exchange::ExchangeError),
    #[error("no lot found for sell order {0}")]
    UnknownSellOrder(crate::domain::OrderId),
    #[error("no lot found for buy order {0}")]
    UnknownBuyOrder(crate::domain::OrderId),
    /// A SELL fill smaller than `Lot.buy_size` is rejected rather than
    /// split into a proportional sub-lot; the Lot stays SELL_PLACED so
    /// the remainder is still tracked against the resting order.
    #[error("sell fill of size {fill_size} is smaller than lot buy_size {buy_size}; partial fills are not supported")]
    PartialFillUnsupported {
        fill_size: Decimal,
        buy_size: Decimal,
    },
}

pub struct LotManager {
    store: Arc<dyn Store>,
    exchange: Arc<dyn ExchangeAdapter>,
}

impl LotManager {
    pub fn new(store: Arc<dyn Store>, exchange: Arc<dyn ExchangeAdapter>) -> Self {
        Self { store, exchange }
    }

    /// Fill-ingestion phase, BUY half: create the Lot, then attempt to
    /// place the paired SELL once. A failed first
    /// attempt does not abandon the Lot — `retry_unplaced_sells` covers
    /// it on the next tick.
    pub async fn on_buy_fill(
        &self,
        config: &Config,
        fill: &Fill,
        quote_increment: Decimal,
        next_lot_id: LotId,
    ) -> Result<Lot, LotManagerError> {
        let mut lot = Lot::new_open(
            fill.market_id.clone(),
            fill.order_id.clone(),
            fill.price,
            fill.size,
            fill.fee,
            fill.timestamp,
            next_lot_id,
        );
        let lot_id = self.store.insert_lot(&lot).await?;
        lot.id = lot_id;

        info!(lot_id = %lot.id, buy_price = %lot.buy_price, buy_size = %lot.buy_size, "lot opened");

        if let Err(e) = self.place_sell(config, &mut lot, quote_increment).await {
            warn!(lot_id = %lot.id, error = %e, "initial sell placement failed, will retry next tick");
        }
        self.store.update_lot(&lot).await?;
        Ok(lot)
    }

    /// Sweep of Lots whose SELL is still missing, called once per tick
    /// before reconciliation so a down exchange never leaves inventory
    /// stranded — a SELL is never abandoned, only retried.
    pub async fn retry_unplaced_sells(
        &self,
        config: &Config,
        market_id: &crate::domain::MarketId,
        quote_increment: Decimal,
    ) -> Result<u32, LotManagerError> {
        let pending = self.store.list_lots_awaiting_sell(market_id).await?;
        let mut placed = 0u32;
        for mut lot in pending {
            match self.place_sell(config, &mut lot, quote_increment).await {
                Ok(()) => {
                    self.store.update_lot(&lot).await?;
                    placed += 1;
                }
                Err(e) => {
                    warn!(lot_id = %lot.id, error = %e, "sell retry still failing");
                }
            }
        }
        Ok(placed)
    }

    async fn place_sell(
        &self,
        config: &Config,
        lot: &mut Lot,
        quote_increment: Decimal,
    ) -> Result<(), LotManagerError> {
        let sell_price = GridPlanner::sell_price(config, lot.buy_price, quote_increment);
        let client_tag = ClientTag::for_sell(lot.id);

        // Bounded: a transient failure here must not block the tick that
        // called us indefinitely. `retry_unplaced_sells` keeps trying
        // every subsequent tick, so giving up after a few attempts loses
        // nothing but frees the caller immediately.
        let mut backoff = ExponentialBackoff::with_config(crate::resilience::BackoffConfig {
            max_retries: Some(3),
            ..Default::default()
        });
        loop {
            match self
                .exchange
                .place_limit_order(
                    &lot.market_id,
                    Side::Sell,
                    sell_price,
                    lot.buy_size,
                    &client_tag,
                    true,
                )
                .await
            {
                Ok(order_id) => {
                    lot.sell_order_id = Some(order_id);
                    lot.sell_price = Some(sell_price);
                    lot.status = LotStatus::SellPlaced;
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    match backoff.next_delay() {
                        Some(delay) => {
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Fill-ingestion phase, SELL half.
    pub async fn on_sell_fill(&self, fill: &Fill) -> Result<Lot, LotManagerError> {
        let mut lot = self
            .store
            .get_lot_by_sell_order(&fill.order_id)
            .await?
            .ok_or_else(|| LotManagerError::UnknownSellOrder(fill.order_id.clone()))?;

        if fill.size < lot.buy_size {
            return Err(LotManagerError::PartialFillUnsupported {
                fill_size: fill.size,
                buy_size: lot.buy_size,
            });
        }

        let realized_pnl = (fill.price - lot.buy_price) * fill.size - lot.buy_fee - fill.fee;

        lot.sell_time = Some(fill.timestamp);
        lot.realized_pnl = Some(realized_pnl);
        lot.status = LotStatus::Closed;

        self.store.update_lot(&lot).await?;
        info!(lot_id = %lot.id, realized_pnl = %realized_pnl, "lot closed");
        Ok(lot)
    }

    /// SMART_REINVEST's monthly gate needs the realized PnL booked since
    /// the start of the current UTC month.
    pub fn is_smart_reinvest_conservative(config: &Config, month_to_date_pnl: Decimal) -> bool {
        matches!(config.profit_mode, ProfitMode::SmartReinvest)
            && month_to_date_pnl < config.monthly_profit_target_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MarketId, OrderId};
    use crate::exchange::{CancelOutcome, ExchangeError, Product};
    use async_trait::async_trait;
    use chrono::Utc;
    use dashmap::DashMap;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeStore {
        lots: DashMap<i64, Lot>,
        next_id: AtomicU64,
    }

    impl FakeStore {
        fn new() -> Self {
            Self {
                lots: DashMap::new(),
                next_id: AtomicU64::new(1),
            }
        }
    }

    #[async_trait]
    impl Store for FakeStore {
        async fn get_market(&self, _id: &MarketId) -> Result<Option<crate::domain::Market>, StoreError> {
            unimplemented!()
        }
        async fn list_markets(&self, _favorites_only: bool) -> Result<Vec<crate::domain::Market>, StoreError> {
            unimplemented!()
        }
        async fn upsert_market(&self, _market: &crate::domain::Market) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn get_enabled_market(&self) -> Result<Option<crate::domain::Market>, StoreError> {
            unimplemented!()
        }
        async fn insert_order(&self, _order: &crate::domain::Order) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn update_order(&self, _order: &crate::domain::Order) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn get_order(&self, _id: &OrderId) -> Result<Option<crate::domain::Order>, StoreError> {
            unimplemented!()
        }
        async fn get_order_by_client_tag(&self, _client_tag: &ClientTag) -> Result<Option<crate::domain::Order>, StoreError> {
            unimplemented!()
        }
        async fn list_open_orders(&self, _market_id: &MarketId) -> Result<Vec<crate::domain::Order>, StoreError> {
            unimplemented!()
        }
        async fn count_open_orders(&self) -> Result<u32, StoreError> {
            unimplemented!()
        }
        async fn list_orders_by_status(
            &self,
            _market_id: &MarketId,
            _status: Option<crate::domain::OrderStatus>,
        ) -> Result<Vec<crate::domain::Order>, StoreError> {
            unimplemented!()
        }
        async fn record_fill(&self, _fill: &Fill) -> Result<bool, StoreError> {
            unimplemented!()
        }
        async fn list_fills(&self, _limit: u32, _skip: u32) -> Result<Vec<Fill>, StoreError> {
            unimplemented!()
        }
        async fn insert_lot(&self, lot: &Lot) -> Result<LotId, StoreError> {
            let id = LotId(self.next_id.fetch_add(1, Ordering::SeqCst) as i64);
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
        async fn list_lots_awaiting_sell(&self, _market_id: &MarketId) -> Result<Vec<Lot>, StoreError> {
            Ok(self
                .lots
                .iter()
                .filter(|l| l.status == LotStatus::Open)
                .map(|l| l.clone())
                .collect())
        }
        async fn list_lots(&self, _limit: u32, _skip: u32) -> Result<Vec<Lot>, StoreError> {
            unimplemented!()
        }
        async fn get_bot_state(&self, _market_id: &MarketId) -> Result<Option<crate::domain::BotState>, StoreError> {
            unimplemented!()
        }
        async fn put_bot_state(&self, _state: &crate::domain::BotState) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn get_config(&self) -> Result<Option<Config>, StoreError> {
            unimplemented!()
        }
        async fn put_config(&self, _config: &Config) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn append_audit_log(&self, _entry: &crate::domain::AuditLogEntry) -> Result<(), StoreError> {
            Ok(())
        }
        async fn last_fill_at(&self, _market_id: &MarketId) -> Result<Option<chrono::DateTime<Utc>>, StoreError> {
            unimplemented!()
        }
    }

    struct FakeExchange {
        fail_first: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ExchangeAdapter for FakeExchange {
        async fn get_products(&self) -> Result<Vec<Product>, ExchangeError> {
            unimplemented!()
        }
        async fn get_balances(&self) -> Result<std::collections::HashMap<String, Decimal>, ExchangeError> {
            unimplemented!()
        }
        async fn get_ticker(&self, _market_id: &MarketId) -> Result<Decimal, ExchangeError> {
            unimplemented!()
        }
        async fn place_limit_order(
            &self,
            _market_id: &MarketId,
            _side: Side,
            _price: Decimal,
            _size: Decimal,
            client_tag: &ClientTag,
            _post_only: bool,
        ) -> Result<OrderId, ExchangeError> {
            if self.fail_first.swap(false, Ordering::SeqCst) {
                return Err(ExchangeError::Transient {
                    reason: "rate limited".into(),
                });
            }
            Ok(OrderId(client_tag.0.clone()))
        }
        async fn cancel_order(&self, _order_id: &OrderId) -> Result<CancelOutcome, ExchangeError> {
            unimplemented!()
        }
        async fn list_open_orders(&self, _market_id: Option<&MarketId>) -> Result<Vec<crate::domain::Order>, ExchangeError> {
            unimplemented!()
        }
        async fn get_fills(&self, _since: chrono::DateTime<Utc>) -> Result<Vec<Fill>, ExchangeError> {
            unimplemented!()
        }
        fn is_paper(&self) -> bool {
            true
        }
        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn buy_fill() -> Fill {
        Fill {
            id: "f1".into(),
            order_id: OrderId("buy-1".into()),
            market_id: MarketId::from("BTC-USD"),
            side: Side::Buy,
            price: dec!(100),
            size: dec!(0.01),
            fee: dec!(0.02),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn on_buy_fill_opens_lot_and_places_sell() {
        let store = Arc::new(FakeStore::new());
        let exchange = Arc::new(FakeExchange {
            fail_first: std::sync::atomic::AtomicBool::new(false),
        });
        let manager = LotManager::new(store.clone(), exchange);
        let config = Config::default();

        let lot = manager
            .on_buy_fill(&config, &buy_fill(), dec!(0.01), LotId(0))
            .await
            .unwrap();

        assert_eq!(lot.status, LotStatus::SellPlaced);
        assert!(lot.sell_order_id.is_some());
        assert_eq!(lot.sell_price.unwrap(), dec!(101.00));
    }

    #[tokio::test]
    async fn sell_retry_recovers_from_transient_failure() {
        let store = Arc::new(FakeStore::new());
        let exchange = Arc::new(FakeExchange {
            fail_first: std::sync::atomic::AtomicBool::new(true),
        });
        let manager = LotManager::new(store.clone(), exchange);
        let config = Config {
            // keep the test fast; jitter is bounded by initial_delay anyway
            ..Config::default()
        };

        let lot = manager
            .on_buy_fill(&config, &buy_fill(), dec!(0.01), LotId(0))
            .await
            .unwrap();
        assert_eq!(lot.status, LotStatus::SellPlaced);
    }

    #[tokio::test]
    async fn partial_sell_fill_is_rejected() {
        let store = Arc::new(FakeStore::new());
        let exchange = Arc::new(FakeExchange {
            fail_first: std::sync::atomic::AtomicBool::new(false),
        });
        let manager = LotManager::new(store.clone(), exchange);
        let config = Config::default();

        let lot = manager
            .on_buy_fill(&config, &buy_fill(), dec!(0.01), LotId(0))
            .await
            .unwrap();

        let partial = Fill {
            id: "f2".into(),
            order_id: lot.sell_order_id.clone().unwrap(),
            market_id: MarketId::from("BTC-USD"),
            side: Side::Sell,
            price: dec!(101),
            size: dec!(0.005), // less than buy_size 0.01
            fee: dec!(0.01),
            timestamp: Utc::now(),
        };

        let err = manager.on_sell_fill(&partial).await.unwrap_err();
        assert!(matches!(err, LotManagerError::PartialFillUnsupported { .. }));
    }

    #[tokio::test]
    async fn full_sell_fill_closes_lot_with_realized_pnl() {
        let store = Arc::new(FakeStore::new());
        let exchange = Arc::new(FakeExchange {
            fail_first: std::sync::atomic::AtomicBool::new(false),
        });
        let manager = LotManager::new(store.clone(), exchange);
        let config = Config::default();

        let lot = manager
            .on_buy_fill(&config, &buy_fill(), dec!(0.01), LotId(0))
            .await
            .unwrap();

        let full = Fill {
            id: "f3".into(),
            order_id: lot.sell_order_id.clone().unwrap(),
            market_id: MarketId::from("BTC-USD"),
            side: Side::Sell,
            price: dec!(101),
            size: dec!(0.01),
            fee: dec!(0.01),
            timestamp: Utc::now(),
        };

        let closed = manager.on_sell_fill(&full).await.unwrap();
        assert_eq!(closed.status, LotStatus::Closed);
        // (sell_price - buy_price) * size - buy_fee - sell_fee, with buy_fee
        // carried over from the BUY fill (0.02) and sell_fee from this fill (0.01).
        assert_eq!(closed.realized_pnl.unwrap(), dec!(0.01) * dec!(0.01) - dec!(0.02) - dec!(0.01));
    }
}
