//! Deterministic in-memory `ExchangeAdapter` for paper trading and
//! tests. Grounded on the teacher's `SimulatedExecutor`
//! (`execution/simulated.rs`): orders live in a map, fills generated
//! by comparing the order's price against the last known ticker rather
//! than truly matching, and "idempotent by client_tag" is a HashMap
//! keyed on the tag rather than the teacher's own idempotency (the
//! teacher never needed one, since it accepts signals directly).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use grid_core::domain::{ClientTag, Fill, MarketId, Order, OrderId, OrderStatus, Side};
use grid_core::exchange::{CancelOutcome, ExchangeAdapter, ExchangeError, Product};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

struct MockOrder {
    order: Order,
}

/// Paper-trading adapter. `set_ticker` lets tests/paper-mode binaries
/// drive the price; `tick_fills` checks resting orders against it and
/// produces `Fill`s the way the teacher's `check_fills` does for
/// market-crossing simulation.
pub struct MockAdapter {
    products: Vec<Product>,
    tickers: DashMap<MarketId, Decimal>,
    orders: DashMap<OrderId, MockOrder>,
    client_tags: DashMap<ClientTag, OrderId>,
    fills: Mutex<Vec<Fill>>,
    balances: DashMap<String, Decimal>,
    next_order_id: AtomicU64,
    next_fill_id: AtomicU64,
}

impl MockAdapter {
    pub fn new(products: Vec<Product>) -> Self {
        let balances = DashMap::new();
        balances.insert("USD".to_string(), Decimal::new(100_000, 2));
        Self {
            products,
            tickers: DashMap::new(),
            orders: DashMap::new(),
            client_tags: DashMap::new(),
            fills: Mutex::new(Vec::new()),
            balances,
            next_order_id: AtomicU64::new(1),
            next_fill_id: AtomicU64::new(1),
        }
    }

    pub fn set_ticker(&self, market_id: &MarketId, price: Decimal) {
        self.tickers.insert(market_id.clone(), price);
        self.tick_fills(market_id, price);
    }

    /// Market-crossing fill simulation (teacher: BUY fills when
    /// market <= order price, SELL fills when market >= order price).
    fn tick_fills(&self, market_id: &MarketId, price: Decimal) {
        let mut to_fill = Vec::new();
        for mut entry in self.orders.iter_mut() {
            let o = &mut entry.value_mut().order;
            if &o.market_id != market_id || o.status != OrderStatus::Open {
                continue;
            }
            let crosses = match o.side {
                Side::Buy => price <= o.price,
                Side::Sell => price >= o.price,
            };
            if crosses {
                o.status = OrderStatus::Filled;
                to_fill.push(o.clone());
            }
        }
        let mut fills = self.fills.lock().expect("mock fill log poisoned");
        for order in to_fill {
            let fee = order.price * order.size * Decimal::new(2, 4); // 2 bps taker fee, matching the teacher's simulated fee model
            let fill = Fill {
                id: format!("mock-fill-{}", self.next_fill_id.fetch_add(1, Ordering::SeqCst)),
                order_id: order.id.clone(),
                market_id: order.market_id.clone(),
                side: order.side,
                price: order.price,
                size: order.size,
                fee,
                timestamp: Utc::now(),
            };
            debug!(order_id = %order.id, price = %fill.price, "mock fill generated");
            fills.push(fill);
        }
    }
}

#[async_trait]
impl ExchangeAdapter for MockAdapter {
    async fn get_products(&self) -> Result<Vec<Product>, ExchangeError> {
        Ok(self.products.clone())
    }

    async fn get_balances(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        Ok(self.balances.iter().map(|e| (e.key().clone(), *e.value())).collect())
    }

    async fn get_ticker(&self, market_id: &MarketId) -> Result<Decimal, ExchangeError> {
        self.tickers
            .get(market_id)
            .map(|p| *p)
            .ok_or_else(|| ExchangeError::Permanent {
                reason: format!("no ticker set for {market_id}"),
            })
    }

    async fn place_limit_order(
        &self,
        market_id: &MarketId,
        side: Side,
        price: Decimal,
        size: Decimal,
        client_tag: &ClientTag,
        _post_only: bool,
    ) -> Result<OrderId, ExchangeError> {
        if let Some(existing) = self.client_tags.get(client_tag) {
            return Ok(existing.clone());
        }
        let id = OrderId(format!("mock-{}", self.next_order_id.fetch_add(1, Ordering::SeqCst)));
        let order = Order {
            id: id.clone(),
            client_tag: client_tag.clone(),
            market_id: market_id.clone(),
            side,
            price,
            size,
            status: OrderStatus::Open,
            created_at: Utc::now(),
            lot_id: None,
        };
        self.client_tags.insert(client_tag.clone(), id.clone());
        self.orders.insert(id.clone(), MockOrder { order });
        info!(order_id = %id, %side, %price, %size, "mock order placed");

        if let Some(ticker) = self.tickers.get(market_id) {
            let price_now = *ticker;
            drop(ticker);
            self.tick_fills(market_id, price_now);
        }
        Ok(id)
    }

    async fn cancel_order(&self, order_id: &OrderId) -> Result<CancelOutcome, ExchangeError> {
        match self.orders.get_mut(order_id) {
            Some(mut entry) => {
                if entry.order.status.is_open() {
                    entry.order.status = OrderStatus::Canceled;
                    Ok(CancelOutcome::Ok)
                } else {
                    Ok(CancelOutcome::NotFound)
                }
            }
            None => Ok(CancelOutcome::NotFound),
        }
    }

    async fn list_open_orders(&self, market_id: Option<&MarketId>) -> Result<Vec<Order>, ExchangeError> {
        Ok(self
            .orders
            .iter()
            .map(|e| e.value().order.clone())
            .filter(|o| o.status.is_open() && market_id.map_or(true, |m| m == &o.market_id))
            .collect())
    }

    async fn get_fills(&self, since: DateTime<Utc>) -> Result<Vec<Fill>, ExchangeError> {
        let fills = self.fills.lock().expect("mock fill log poisoned");
        Ok(fills.iter().filter(|f| f.timestamp >= since).cloned().collect())
    }

    fn is_paper(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product() -> Product {
        Product {
            id: MarketId::from("BTC-USD"),
            base_increment: dec!(0.00001),
            quote_increment: dec!(0.01),
            min_size: dec!(0.0001),
        }
    }

    #[tokio::test]
    async fn place_is_idempotent_by_client_tag() {
        let adapter = MockAdapter::new(vec![product()]);
        let tag = ClientTag("buy-BTC-USD-1".into());
        let market = MarketId::from("BTC-USD");
        let id1 = adapter
            .place_limit_order(&market, Side::Buy, dec!(100), dec!(0.01), &tag, true)
            .await
            .unwrap();
        let id2 = adapter
            .place_limit_order(&market, Side::Buy, dec!(100), dec!(0.01), &tag, true)
            .await
            .unwrap();
        assert_eq!(id1, id2);
        assert_eq!(adapter.orders.len(), 1);
    }

    #[tokio::test]
    async fn buy_fills_when_price_crosses_down() {
        let adapter = MockAdapter::new(vec![product()]);
        let market = MarketId::from("BTC-USD");
        adapter.set_ticker(&market, dec!(100));
        let tag = ClientTag("buy-BTC-USD-1".into());
        adapter
            .place_limit_order(&market, Side::Buy, dec!(99), dec!(0.01), &tag, true)
            .await
            .unwrap();
        adapter.set_ticker(&market, dec!(98));
        let fills = adapter.get_fills(DateTime::<Utc>::from_timestamp(0, 0).unwrap()).await.unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].side, Side::Buy);
    }

    #[tokio::test]
    async fn cancel_marks_order_canceled() {
        let adapter = MockAdapter::new(vec![product()]);
        let market = MarketId::from("BTC-USD");
        let tag = ClientTag("buy-BTC-USD-1".into());
        let id = adapter
            .place_limit_order(&market, Side::Buy, dec!(100), dec!(0.01), &tag, true)
            .await
            .unwrap();
        let outcome = adapter.cancel_order(&id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Ok);
        let open = adapter.list_open_orders(Some(&market)).await.unwrap();
        assert!(open.is_empty());
    }
}
