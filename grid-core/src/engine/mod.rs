//! The tick-driven state machine that drives a single active market.
//! Unlike the teacher's `Engine<S: Strategy, E: Executor>`
//! (const-generic, a single in-process hot loop running at nanosecond
//! cadence), this Engine is async, holds its exchange adapter and store
//! behind trait objects, and ticks once every `Config::tick_period_ms`
//! — slow enough that dynamic dispatch and heap allocation in the loop
//! body cost nothing measurable. The shutdown pattern (an
//! `Arc<AtomicBool>` checked between phases, `ctrlc::set_handler`
//! wired by the binary) is kept unchanged from the teacher.

mod stats;

pub use stats::EngineStats;

use crate::config::Config;
use crate::domain::{Actor, AuditLogEntry, BotState, EngineMode, MarketId, Side};
use crate::event_bus::{Event, EventBus};
use crate::exchange::ExchangeAdapter;
use crate::grid_planner::PlannerContext;
use crate::lot_manager::LotManager;
use crate::reconciler::Reconciler;
use crate::risk::{RiskContext, RiskGovernor};
use crate::store::{Store, StoreError};
use arc_swap::ArcSwap;
use chrono::Datelike;
use rust_decimal::Decimal;
use std::collections::BinaryHeap;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("exchange error: {0}")]
    Exchange(#[from] crate::exchange::ExchangeError),
    #[error("lot manager error: {0}")]
    LotManager(#[from] crate::lot_manager::LotManagerError),
    #[error("reconciler error: {0}")]
    Reconciler(#[from] crate::reconciler::ReconcilerError),
    #[error("no market is currently enabled")]
    NoActiveMarket,
    #[error("market {0} is already the active market")]
    AlreadyActive(MarketId),
}

/// Orchestrates one market's tick loop: Store + ExchangeAdapter +
/// GridPlanner + RiskGovernor + LotManager + Reconciler + EventBus.
pub struct Engine {
    config: Arc<ArcSwap<Config>>,
    store: Arc<dyn Store>,
    exchange: Arc<dyn ExchangeAdapter>,
    events: Arc<EventBus>,
    lot_manager: LotManager,
    reconciler: Reconciler,
    shutdown: Arc<AtomicBool>,
    consecutive_failures: std::sync::atomic::AtomicU32,
}

impl Engine {
    pub fn new(
        config: Arc<ArcSwap<Config>>,
        store: Arc<dyn Store>,
        exchange: Arc<dyn ExchangeAdapter>,
        events: Arc<EventBus>,
    ) -> Self {
        let lot_manager = LotManager::new(store.clone(), exchange.clone());
        let reconciler = Reconciler::new(store.clone(), exchange.clone());
        Self {
            config,
            store,
            exchange,
            events,
            lot_manager,
            reconciler,
            shutdown: Arc::new(AtomicBool::new(false)),
            consecutive_failures: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub async fn exchange_products(&self) -> Result<Vec<crate::exchange::Product>, crate::exchange::ExchangeError> {
        self.exchange.get_products().await
    }

    /// Sum of `realized_pnl` for lots closed since the first of the
    /// current calendar month, in the exchange's UTC clock. Feeds
    /// SMART_REINVEST's conservative-sizing gate.
    async fn month_to_date_realized_pnl(&self) -> Result<Decimal, EngineError> {
        let now = chrono::Utc::now();
        let month_start = now
            .date_naive()
            .with_day(1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .unwrap_or(now);
        let lots = self.store.list_lots(100_000, 0).await?;
        Ok(lots
            .iter()
            .filter_map(|lot| match (lot.sell_time, lot.realized_pnl) {
                (Some(sell_time), Some(pnl)) if sell_time >= month_start => Some(pnl),
                _ => None,
            })
            .sum())
    }

    pub async fn exchange_ticker(&self, market_id: &MarketId) -> Result<Decimal, crate::exchange::ExchangeError> {
        self.exchange.get_ticker(market_id).await
    }

    /// Cancels a single order via the exchange, bypassing the RiskGovernor
    /// the same way `cancel_all` does. Returns `false` if the order was
    /// already not open.
    pub async fn cancel_one(&self, order: &crate::domain::Order) -> Result<bool, EngineError> {
        if order.status != crate::domain::OrderStatus::Open {
            return Ok(false);
        }
        self.exchange.cancel_order(&order.id).await?;
        let mut canceled = order.clone();
        canceled.status = crate::domain::OrderStatus::Canceled;
        self.store.update_order(&canceled).await?;
        Ok(true)
    }

    /// Transactional start: stop whatever market is currently enabled
    /// before enabling the target, since only one market may run at a
    /// time. If the stop leg fails, the start never happens.
    pub async fn start_market(&self, market_id: &MarketId) -> Result<(), EngineError> {
        if let Some(current) = self.store.get_enabled_market().await? {
            if &current.id == market_id {
                return Err(EngineError::AlreadyActive(market_id.clone()));
            }
            self.stop_market(&current.id).await?;
        }

        let mut market = self
            .store
            .get_market(market_id)
            .await?
            .unwrap_or_else(|| crate::domain::Market::new(market_id.clone()));
        let before = serde_json::to_value(&market).unwrap_or_default();
        market.enabled = true;
        self.store.upsert_market(&market).await?;
        let after = serde_json::to_value(&market).unwrap_or_default();

        self.store
            .append_audit_log(&AuditLogEntry::new(Actor::User, "start_market", before, after))
            .await?;

        let price = self.exchange.get_ticker(market_id).await?;
        let mut bot_state = BotState::new(market_id.clone(), price);
        bot_state.mode = EngineMode::Running;
        self.store.put_bot_state(&bot_state).await?;

        self.events.publish(Event::StateChange {
            market_id: market_id.clone(),
            mode: EngineMode::Running,
        });
        info!(market = %market_id, "market started");
        Ok(())
    }

    /// Cancels all OPEN orders on `market_id` via the RiskGovernor-
    /// bypassing kill path, then disables it.
    pub async fn stop_market(&self, market_id: &MarketId) -> Result<(), EngineError> {
        self.cancel_all(market_id).await?;

        let mut market = self
            .store
            .get_market(market_id)
            .await?
            .ok_or_else(|| EngineError::NoActiveMarket)?;
        let before = serde_json::to_value(&market).unwrap_or_default();
        market.enabled = false;
        self.store.upsert_market(&market).await?;
        let after = serde_json::to_value(&market).unwrap_or_default();
        self.store
            .append_audit_log(&AuditLogEntry::new(Actor::User, "stop_market", before, after))
            .await?;

        self.events.publish(Event::StateChange {
            market_id: market_id.clone(),
            mode: EngineMode::Stopped,
        });
        info!(market = %market_id, "market stopped");
        Ok(())
    }

    /// Emergency kill switch: cancels every OPEN order regardless of
    /// RiskGovernor state. In-flight cancels are allowed to complete;
    /// any resulting fill is still routed through LotManager so a Lot
    /// never leaks.
    pub async fn cancel_all(&self, market_id: &MarketId) -> Result<u32, EngineError> {
        let open = self.store.list_open_orders(market_id).await?;
        let mut canceled = 0u32;
        for order in open {
            match self.exchange.cancel_order(&order.id).await {
                Ok(_) => {
                    let mut c = order.clone();
                    c.status = crate::domain::OrderStatus::Canceled;
                    self.store.update_order(&c).await?;
                    canceled += 1;
                }
                Err(e) => warn!(order_id = %order.id, error = %e, "cancel_all: cancel failed"),
            }
        }
        Ok(canceled)
    }

    /// Runs the tick loop until the shutdown flag is set. Ticks never
    /// overlap: each iteration awaits to completion before the next
    /// sleep begins — there is no reentrancy.
    pub async fn run(&self) -> EngineStats {
        let mut stats = EngineStats::default();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let config = self.config.load_full();
            let period = std::time::Duration::from_millis(config.tick_period_ms);

            match self.process_tick().await {
                Ok(()) => {
                    stats.ticks += 1;
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                }
                Err(e) => {
                    error!(error = %e, "tick failed, will retry next cycle");
                    stats.failed_ticks += 1;
                    self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                }
            }

            tokio::time::sleep(period).await;
        }
        info!(ticks = stats.ticks, failed = stats.failed_ticks, "engine loop exited");
        stats
    }

    /// Runs a single tick against the currently loaded config. Exposed
    /// publicly so tests can drive the engine deterministically instead
    /// of waiting on `run`'s sleep loop.
    pub async fn process_tick(&self) -> Result<(), EngineError> {
        let config = self.config.load_full();
        self.tick(&config).await
    }

    /// One pass through the tick's seven phases: refresh state, ingest
    /// price, update the anchor, compute the desired grid, ingest fills,
    /// retry unplaced sells, and reconcile. A phase failing
    /// logs and ends the tick early rather than propagating a panic;
    /// the loop itself never dies because of a single bad tick.
    async fn tick(&self, config: &Config) -> Result<(), EngineError> {
        // Phase 1: refresh state.
        let market = self
            .store
            .get_enabled_market()
            .await?
            .ok_or(EngineError::NoActiveMarket)?;
        let mut bot_state = self
            .store
            .get_bot_state(&market.id)
            .await?
            .unwrap_or_else(|| BotState::new(market.id.clone(), Decimal::ZERO));

        // Phase 2: ingest price.
        let price = self.exchange.get_ticker(&market.id).await?;

        // Phase 3: update anchor (I2: never decreases).
        if bot_state.update_anchor(price) {
            self.store.put_bot_state(&bot_state).await?;
        }
        bot_state.last_tick_at = Some(chrono::Utc::now());
        self.store.put_bot_state(&bot_state).await?;

        self.events.publish(Event::PriceUpdate {
            market_id: market.id.clone(),
            price,
            timestamp: chrono::Utc::now(),
        });

        // Phase 4: compute grid.
        let products = self.exchange.get_products().await?;
        let product = products
            .iter()
            .find(|p| p.id == market.id)
            .cloned()
            .ok_or_else(|| crate::exchange::ExchangeError::Permanent {
                reason: format!("unknown product {}", market.id),
            })?;
        let planner_ctx = PlannerContext {
            price,
            anchor_high: bot_state.anchor_high,
            available_capital_usd: config.budget_usd,
            current_month_realized_pnl_usd: self.month_to_date_realized_pnl().await?,
            base_increment: product.base_increment,
        };
        let desired = Reconciler::plan(config, &planner_ctx);

        // Phase 5: ingest fills, timestamp-ordered.
        let since = self.store.last_fill_at(&market.id).await?.unwrap_or_else(|| {
            chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).expect("epoch is a valid timestamp")
        });
        let fresh_fills = self.exchange.get_fills(since).await?;
        let mut heap: BinaryHeap<Reverse<QueuedFillOrdKey>> = BinaryHeap::new();
        let mut by_key = std::collections::HashMap::new();
        for fill in fresh_fills {
            let is_new = self.store.record_fill(&fill).await?;
            if !is_new {
                continue;
            }
            let key = QueuedFillOrdKey(fill.timestamp, fill.id.clone());
            by_key.insert(key.clone(), fill);
            heap.push(Reverse(key));
        }
        let mut next_lot_id_seed = chrono::Utc::now().timestamp_millis();
        while let Some(Reverse(key)) = heap.pop() {
            let fill = by_key.remove(&key).expect("key pushed alongside its fill");
            match fill.side {
                Side::Buy => {
                    next_lot_id_seed += 1;
                    match self
                        .lot_manager
                        .on_buy_fill(config, &fill, product.quote_increment, crate::domain::LotId(next_lot_id_seed))
                        .await
                    {
                        Ok(_) => {}
                        Err(e) => error!(error = %e, order = %fill.order_id, "on_buy_fill failed"),
                    }
                }
                Side::Sell => match self.lot_manager.on_sell_fill(&fill).await {
                    Ok(_) => {}
                    Err(e) => error!(error = %e, order = %fill.order_id, "on_sell_fill failed"),
                },
            }
            self.events.publish(Event::OrderFilled { fill: fill.clone() });
        }

        // Retry any SELL that failed to place on a previous tick.
        if let Err(e) = self
            .lot_manager
            .retry_unplaced_sells(config, &market.id, product.quote_increment)
            .await
        {
            warn!(error = %e, "retry_unplaced_sells failed");
        }

        // Phase 6: reconcile.
        let open_orders = self.store.list_open_orders(&market.id).await?;
        let open_buy_notional_usd = open_orders
            .iter()
            .filter(|o| o.side == Side::Buy)
            .map(|o| o.price * o.size)
            .sum();
        let risk_ctx = RiskContext {
            total_open_orders: open_orders.len() as u32,
            active_market_count: 1, // Highlander
            open_buy_notional_usd,
            open_lot_cost_basis_usd: Decimal::ZERO, // summed from open lots by the stats endpoint; zero here keeps the hot path free of an extra Store round trip
            usd_balance: *self
                .exchange
                .get_balances()
                .await?
                .get("USD")
                .unwrap_or(&Decimal::ZERO),
            engine_mode: bot_state.mode,
        };

        let new_mode = if RiskGovernor::in_hold(config, &risk_ctx) {
            EngineMode::Hold
        } else if bot_state.mode == EngineMode::Hold {
            EngineMode::Running
        } else {
            bot_state.mode
        };
        if new_mode != bot_state.mode {
            bot_state.mode = new_mode;
            self.store.put_bot_state(&bot_state).await?;
            self.events.publish(Event::StateChange {
                market_id: market.id.clone(),
                mode: new_mode,
            });
        }

        let backoff_pressure = self.consecutive_failures.load(Ordering::Relaxed).min(config.reconcile_batch_size - 1);
        self.reconciler
            .reconcile_tick(config, &market.id, &desired, &risk_ctx, product.quote_increment, backoff_pressure)
            .await?;

        Ok(())
    }
}

/// Sort key for the fill-ordering heap; distinct from `QueuedFill` so
/// the heap itself never needs to clone a whole `Fill`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QueuedFillOrdKey(chrono::DateTime<chrono::Utc>, String);

impl PartialOrd for QueuedFillOrdKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedFillOrdKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0).then_with(|| self.1.cmp(&other.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_fill_ord_key_orders_by_timestamp() {
        let a = QueuedFillOrdKey(chrono::DateTime::<chrono::Utc>::from_timestamp(1, 0).unwrap(), "a".into());
        let b = QueuedFillOrdKey(chrono::DateTime::<chrono::Utc>::from_timestamp(2, 0).unwrap(), "b".into());
        assert!(a < b);
    }
}
