//! Startup and per-tick reconciliation between local state and the
//! exchange.

use crate::config::Config;
use crate::domain::{ClientTag, MarketId, Order, OrderStatus, Side};
use crate::exchange::ExchangeAdapter;
use crate::grid_planner::{GridLevel, GridPlanner, PlannerContext};
use crate::risk::{RiskContext, RiskGovernor, RiskVerdict};
use crate::store::{Store, StoreError};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ReconcilerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("exchange error: {0}")]
    Exchange(#[from] crate::exchange::ExchangeError),
}

/// Result of a startup reconciliation pass.
#[derive(Debug, Default)]
pub struct StartupReport {
    pub matched: usize,
    pub orphan_exchange_canceled: usize,
    pub orphan_local_marked_canceled: usize,
    pub orphan_local_marked_filled: usize,
}

/// Result of a per-tick reconciliation pass.
#[derive(Debug, Default)]
pub struct TickReport {
    pub canceled: u32,
    pub placed: u32,
    pub denied: u32,
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    exchange: Arc<dyn ExchangeAdapter>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, exchange: Arc<dyn ExchangeAdapter>) -> Self {
        Self { store, exchange }
    }

    /// Blocking startup pass: resolve Matched, Orphan-exchange and
    /// Orphan-local sets before the tick loop ever runs.
    pub async fn reconcile_startup(
        &self,
        market_id: &MarketId,
    ) -> Result<StartupReport, ReconcilerError> {
        let mut report = StartupReport::default();

        let local_open = self.store.list_open_orders(market_id).await?;
        let exchange_open = self.exchange.list_open_orders(Some(market_id)).await?;

        let local_ids: HashSet<_> = local_open.iter().map(|o| o.id.clone()).collect();
        let exchange_ids: HashSet<_> = exchange_open.iter().map(|o| o.id.clone()).collect();

        report.matched = local_ids.intersection(&exchange_ids).count();

        // Orphan-exchange: present on the exchange, absent locally. We
        // only trust orders carrying our client_tag prefixes; anything
        // else is foreign and canceled to keep state pristine.
        for order in &exchange_open {
            if !local_ids.contains(&order.id) {
                match self.exchange.cancel_order(&order.id).await {
                    Ok(_) => {
                        report.orphan_exchange_canceled += 1;
                        warn!(order_id = %order.id, "canceled orphan-exchange order");
                    }
                    Err(e) => warn!(order_id = %order.id, error = %e, "failed to cancel orphan-exchange order"),
                }
            }
        }

        // Orphan-local: OPEN in our DB but absent on the exchange. Check
        // fill history since our last known fill; if filled, the fill
        // ingestion path (LotManager) will pick it up from `get_fills`
        // on the next tick, so here we only flip non-filled ones to
        // CANCELED so they stop counting against the order cap.
        let since = self.store.last_fill_at(market_id).await?.unwrap_or_else(|| {
            chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).expect("epoch is a valid timestamp")
        });
        let recent_fills = self.exchange.get_fills(since).await?;
        let filled_order_ids: HashSet<_> = recent_fills.iter().map(|f| f.order_id.clone()).collect();

        for order in &local_open {
            if exchange_ids.contains(&order.id) {
                continue;
            }
            if filled_order_ids.contains(&order.id) {
                report.orphan_local_marked_filled += 1;
                // Left for the fill-ingestion phase; LotManager derives
                // the Lot transition from the Fill row, not from here.
                continue;
            }
            let mut canceled = order.clone();
            canceled.status = OrderStatus::Canceled;
            self.store.update_order(&canceled).await?;
            report.orphan_local_marked_canceled += 1;
        }

        info!(
            matched = report.matched,
            orphan_exchange = report.orphan_exchange_canceled,
            orphan_local_canceled = report.orphan_local_marked_canceled,
            orphan_local_filled = report.orphan_local_marked_filled,
            "startup reconciliation complete"
        );

        Ok(report)
    }

    /// Cheap per-tick pass: diff the desired grid against OPEN orders,
    /// cancel what shouldn't be there, place
    /// what's missing, bounded by `K = config.reconcile_batch_size`
    /// (adjusted down under `backoff_pressure`). Cancels always precede
    /// placements so the order-count cap is respected mid-reconcile.
    #[allow(clippy::too_many_arguments)]
    pub async fn reconcile_tick(
        &self,
        config: &Config,
        market_id: &MarketId,
        desired: &[GridLevel],
        ctx: &RiskContext,
        quote_increment: rust_decimal::Decimal,
        backoff_pressure: u32,
    ) -> Result<TickReport, ReconcilerError> {
        let mut report = TickReport::default();
        let k = (config.reconcile_batch_size.saturating_sub(backoff_pressure)).max(1);

        let open_orders = self.store.list_open_orders(market_id).await?;
        // Quantize each desired level's price to the market's quote
        // increment once, up front: this quantized price is both the
        // order's resting price and its identity, so a level that has
        // genuinely shifted (by at least one increment) gets a new tag
        // and is pruned/re-placed, instead of being mistaken for the
        // original level forever.
        let desired_prices: Vec<(rust_decimal::Decimal, &GridLevel)> = desired
            .iter()
            .map(|lvl| (round_to(lvl.price, quote_increment), lvl))
            .collect();
        let desired_tags: HashSet<ClientTag> = desired_prices
            .iter()
            .map(|(price, _)| ClientTag::for_buy_level(market_id, *price))
            .collect();

        // Prune: cancel open BUY orders no longer in the desired set.
        let to_cancel: Vec<&Order> = open_orders
            .iter()
            .filter(|o| o.side == Side::Buy && !desired_tags.contains(&o.client_tag))
            .take(k as usize)
            .collect();
        for order in to_cancel {
            match self.exchange.cancel_order(&order.id).await {
                Ok(_) => {
                    let mut canceled = order.clone();
                    canceled.status = OrderStatus::Canceled;
                    self.store.update_order(&canceled).await?;
                    report.canceled += 1;
                }
                Err(e) => warn!(order_id = %order.id, error = %e, "prune cancel failed"),
            }
        }

        // Extend: place desired levels not yet open, respecting RiskGovernor.
        let open_tags: HashSet<ClientTag> = open_orders
            .iter()
            .filter(|o| o.side == Side::Buy)
            .map(|o| o.client_tag.clone())
            .collect();

        let mut placed_this_tick = 0u32;
        for (price, level) in &desired_prices {
            let price = *price;
            if placed_this_tick >= k {
                break;
            }
            let tag = ClientTag::for_buy_level(market_id, price);
            if open_tags.contains(&tag) {
                continue;
            }
            let notional = price * level.size_base;
            match RiskGovernor::evaluate_placement(config, ctx, Side::Buy, notional) {
                RiskVerdict::Denied(denial) => {
                    report.denied += 1;
                    info!(%denial, level = level.index, "buy placement denied");
                    continue;
                }
                RiskVerdict::Admitted => {}
            }
            match self
                .exchange
                .place_limit_order(market_id, Side::Buy, price, level.size_base, &tag, true)
                .await
            {
                Ok(order_id) => {
                    let order = Order {
                        id: order_id,
                        client_tag: tag,
                        market_id: market_id.clone(),
                        side: Side::Buy,
                        price,
                        size: level.size_base,
                        status: OrderStatus::Open,
                        created_at: chrono::Utc::now(),
                        lot_id: None,
                    };
                    self.store.insert_order(&order).await?;
                    report.placed += 1;
                    placed_this_tick += 1;
                }
                Err(e) => warn!(level = level.index, error = %e, "extend placement failed"),
            }
        }

        Ok(report)
    }

    /// Computes the desired grid for this tick; split out so the Engine
    /// can log/publish it before reconciling.
    pub fn plan(config: &Config, planner_ctx: &PlannerContext) -> Vec<GridLevel> {
        GridPlanner::desired_levels(config, planner_ctx)
    }
}

fn round_to(value: rust_decimal::Decimal, increment: rust_decimal::Decimal) -> rust_decimal::Decimal {
    if increment <= rust_decimal::Decimal::ZERO {
        return value;
    }
    (value / increment).round() * increment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EngineMode;
    use rust_decimal_macros::dec;

    #[test]
    fn plan_matches_grid_planner_output() {
        let config = Config::default();
        let ctx = PlannerContext {
            price: dec!(100),
            anchor_high: dec!(100),
            available_capital_usd: dec!(1000),
            current_month_realized_pnl_usd: dec!(0),
            base_increment: dec!(0.00001),
        };
        let levels = Reconciler::plan(&config, &ctx);
        assert!(!levels.is_empty());
    }

    #[test]
    fn round_to_increment_rounds_half_up() {
        assert_eq!(round_to(dec!(100.006), dec!(0.01)), dec!(100.01));
    }

    #[test]
    fn risk_context_default_admits_buy() {
        let config = Config::default();
        let ctx = RiskContext {
            total_open_orders: 0,
            active_market_count: 1,
            open_buy_notional_usd: dec!(0),
            open_lot_cost_basis_usd: dec!(0),
            usd_balance: dec!(1000),
            engine_mode: EngineMode::Running,
        };
        assert_eq!(
            RiskGovernor::evaluate_placement(&config, &ctx, Side::Buy, dec!(10)),
            RiskVerdict::Admitted
        );
    }
}
