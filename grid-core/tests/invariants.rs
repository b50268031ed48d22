//! Property tests for the invariants that must hold across every
//! config and price path, not just the scenarios hand-picked above.

use grid_core::config::Config;
use grid_core::domain::{BotState, MarketId};
use grid_core::grid_planner::{GridPlanner, PlannerContext};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn arb_price() -> impl Strategy<Value = i64> {
    1_000i64..10_000_000i64
}

proptest! {
    /// I2: the anchor is non-decreasing under any sequence of prices.
    #[test]
    fn anchor_never_decreases_under_any_price_sequence(prices in prop::collection::vec(arb_price(), 1..50)) {
        let mut state = BotState::new(MarketId::from("BTC-USD"), Decimal::new(prices[0], 2));
        let mut high = state.anchor_high;
        for raw in &prices {
            let price = Decimal::new(*raw, 2);
            state.update_anchor(price);
            prop_assert!(state.anchor_high >= high);
            high = state.anchor_high;
        }
    }

    /// I3: a computed sell price is always strictly above the buy
    /// price, across every profit mode and grid step in (0, 1).
    #[test]
    fn sell_price_always_clears_buy_price(
        buy_price_cents in 100i64..10_000_000i64,
        step_bp in 1i64..9_000i64,
    ) {
        let buy_price = Decimal::new(buy_price_cents, 2);
        let config = Config {
            grid_step_pct: Decimal::new(step_bp, 4),
            ..Config::default()
        };
        let sell = GridPlanner::sell_price(&config, buy_price, dec!(0.01));
        prop_assert!(sell > buy_price);
    }

    /// Desired-levels output is always within [min_band_orders,
    /// max_band_orders] and strictly descending in price.
    #[test]
    fn desired_levels_respect_band_order_bounds_and_descend(
        price_cents in 1_000i64..10_000_000i64,
        step_bp in 10i64..2_000i64,
        depth_bp in 100i64..9_000i64,
        min_orders in 1u32..10,
        extra in 0u32..20,
    ) {
        let max_orders = min_orders + extra;
        let config = Config {
            grid_step_pct: Decimal::new(step_bp, 4),
            staging_band_depth_pct: Decimal::new(depth_bp, 4),
            min_band_orders: min_orders,
            max_band_orders: max_orders,
            ..Config::default()
        };
        let price = Decimal::new(price_cents, 2);
        let ctx = PlannerContext {
            price,
            anchor_high: price,
            available_capital_usd: dec!(100_000),
            current_month_realized_pnl_usd: dec!(0),
            base_increment: dec!(0.00001),
        };
        let levels = GridPlanner::desired_levels(&config, &ctx);

        prop_assert!(levels.len() as u32 <= max_orders);
        for window in levels.windows(2) {
            prop_assert!(window[0].price > window[1].price, "levels must strictly descend");
        }
        for level in &levels {
            prop_assert!(level.price > Decimal::ZERO);
        }
    }
}
