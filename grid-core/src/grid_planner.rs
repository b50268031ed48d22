//! Staging-band grid level generation.
//!
//! `GridPlanner` is a pure function of `(price, anchor_high, config)`; it
//! never touches the Store or the exchange. The Reconciler is the only
//! consumer, and diffs the planner's output against open orders.

use crate::config::{Config, ProfitMode, SizingMode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridLevel {
    /// Index from the top of the band, 1-based.
    pub index: u32,
    pub price: Decimal,
    pub size_base: Decimal,
}

/// Inputs available to the planner beyond `Config`. Balance figures are
/// needed for `CAPITAL_PCT` sizing and `SMART_REINVEST`'s monthly gate.
#[derive(Debug, Clone, Copy)]
pub struct PlannerContext {
    pub price: Decimal,
    pub anchor_high: Decimal,
    pub available_capital_usd: Decimal,
    pub current_month_realized_pnl_usd: Decimal,
    /// Smallest tradeable increment of the base asset (exchange rule).
    pub base_increment: Decimal,
}

pub struct GridPlanner;

impl GridPlanner {
    pub fn grid_top(config: &Config, anchor_high: Decimal) -> Decimal {
        if config.buffer_enabled {
            anchor_high * (Decimal::ONE - config.buffer_pct)
        } else {
            anchor_high
        }
    }

    /// Desired BUY levels, highest price first, deterministic for
    /// identical inputs.
    pub fn desired_levels(config: &Config, ctx: &PlannerContext) -> Vec<GridLevel> {
        let grid_top = Self::grid_top(config, ctx.anchor_high);
        let band_hi = ctx.price.min(grid_top);
        let band_lo_nominal = ctx.price * (Decimal::ONE - config.staging_band_depth_pct);

        let mut levels = Vec::with_capacity(config.max_band_orders as usize);
        let mut level_price = band_hi;
        let mut k: u32 = 0;

        // Primary pass: walk down by grid_step_pct while >= band_lo_nominal
        // and under the configured cap.
        while k < config.max_band_orders {
            level_price *= Decimal::ONE - config.grid_step_pct;
            k += 1;
            if level_price < band_lo_nominal && k > config.min_band_orders {
                break;
            }
            if level_price <= Decimal::ZERO {
                break;
            }
            levels.push(GridLevel {
                index: k,
                price: level_price,
                size_base: Decimal::ZERO, // filled in by `size_levels`
            });
            if levels.len() as u32 >= config.max_band_orders {
                break;
            }
        }

        // Floor: widen downward past the nominal band depth, but only if
        // needed to reach `min_band_orders`.
        while (levels.len() as u32) < config.min_band_orders && (levels.len() as u32) < config.max_band_orders {
            level_price *= Decimal::ONE - config.grid_step_pct;
            k += 1;
            if level_price <= Decimal::ZERO {
                break;
            }
            levels.push(GridLevel {
                index: k,
                price: level_price,
                size_base: Decimal::ZERO,
            });
        }

        debug!(count = levels.len(), band_hi = %band_hi, band_lo = %band_lo_nominal, "computed grid levels");

        Self::size_levels(config, ctx, levels)
    }

    fn target_order_count(config: &Config, level_count: usize) -> Decimal {
        if level_count == 0 {
            return Decimal::ONE;
        }
        Decimal::from(level_count as u64)
    }

    fn size_levels(config: &Config, ctx: &PlannerContext, mut levels: Vec<GridLevel>) -> Vec<GridLevel> {
        let target_count = Self::target_order_count(config, levels.len());

        // SMART_REINVEST: conservative sizing until the monthly target is hit.
        let smart_conservative = matches!(config.profit_mode, ProfitMode::SmartReinvest)
            && ctx.current_month_realized_pnl_usd < config.monthly_profit_target_usd;

        for level in levels.iter_mut() {
            let mut size_usd = match config.sizing_mode {
                SizingMode::BudgetSplit => config.budget_usd / target_count,
                SizingMode::FixedUsd => config.fixed_usd_per_trade,
                SizingMode::CapitalPct => {
                    ctx.available_capital_usd * config.capital_pct_per_trade / dec!(100)
                }
            };

            if smart_conservative {
                size_usd *= config.smart_reinvest_conservative_multiplier;
            }

            if size_usd <= Decimal::ZERO || level.price <= Decimal::ZERO {
                level.size_base = Decimal::ZERO;
                continue;
            }

            let raw_size = size_usd / level.price;
            level.size_base = round_to_increment(raw_size, ctx.base_increment);
        }

        levels
    }

    /// Sell price for a paired SELL, per the profit-mode policy table,
    /// rounded up to `quote_increment` so the sell-never-below-buy
    /// invariant holds strictly even after rounding.
    pub fn sell_price(config: &Config, buy_price: Decimal, quote_increment: Decimal) -> Decimal {
        let raw = match config.profit_mode {
            ProfitMode::Step | ProfitMode::StepReinvest | ProfitMode::SmartReinvest => {
                buy_price * (Decimal::ONE + config.grid_step_pct)
            }
            ProfitMode::Custom => buy_price * (Decimal::ONE + config.custom_profit_pct),
        };
        round_up_to_increment(raw, quote_increment)
    }

    /// Minimum acceptable sell price enforcing I3 even after fees.
    pub fn min_acceptable_sell_price(config: &Config, buy_price: Decimal) -> Decimal {
        buy_price * (Decimal::ONE + config.grid_step_pct - config.fee_buffer_pct)
    }
}

fn round_to_increment(value: Decimal, increment: Decimal) -> Decimal {
    if increment <= Decimal::ZERO {
        return value;
    }
    (value / increment).trunc() * increment
}

fn round_up_to_increment(value: Decimal, increment: Decimal) -> Decimal {
    if increment <= Decimal::ZERO {
        return value;
    }
    let units = (value / increment).ceil();
    units * increment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn ctx(price: Decimal, anchor: Decimal) -> PlannerContext {
        PlannerContext {
            price,
            anchor_high: anchor,
            available_capital_usd: dec!(1000),
            current_month_realized_pnl_usd: dec!(0),
            base_increment: dec!(0.00001),
        }
    }

    /// step=0.01, band_depth=0.05, min=max=10, size=$100, STEP mode,
    /// price=anchor=$100.
    #[test]
    fn basic_cycle_levels_descend_ten_percent_band() {
        let mut config = Config {
            grid_step_pct: dec!(0.01),
            budget_usd: dec!(1000),
            staging_band_depth_pct: dec!(0.05),
            min_band_orders: 10,
            max_band_orders: 10,
            sizing_mode: SizingMode::FixedUsd,
            fixed_usd_per_trade: dec!(100),
            ..Config::default()
        };
        config.validate().unwrap();

        let levels = GridPlanner::desired_levels(&config, &ctx(dec!(100), dec!(100)));
        assert_eq!(levels.len(), 10);
        assert_eq!(levels[0].price, dec!(100) * dec!(0.99));
        let last = levels.last().unwrap();
        // 100 * 0.99^10 ~= 90.44
        assert!(last.price > dec!(90) && last.price < dec!(91));
    }

    #[test]
    fn levels_are_strictly_descending() {
        let config = Config::default();
        let levels = GridPlanner::desired_levels(&config, &ctx(dec!(50000), dec!(50500)));
        for pair in levels.windows(2) {
            assert!(pair[0].price > pair[1].price);
        }
    }

    #[test]
    fn zero_band_depth_yields_min_band_orders_compressed_at_band_hi() {
        let config = Config {
            staging_band_depth_pct: dec!(0.0),
            min_band_orders: 10,
            max_band_orders: 25,
            ..Config::default()
        };
        let levels = GridPlanner::desired_levels(&config, &ctx(dec!(100), dec!(100)));
        assert_eq!(levels.len(), 10);
    }

    #[test]
    fn determinism_same_inputs_same_output() {
        let config = Config::default();
        let a = GridPlanner::desired_levels(&config, &ctx(dec!(42000), dec!(43000)));
        let b = GridPlanner::desired_levels(&config, &ctx(dec!(42000), dec!(43000)));
        assert_eq!(a, b);
    }

    #[test]
    fn sell_price_step_mode_clears_min_acceptable() {
        let config = Config {
            profit_mode: ProfitMode::Step,
            grid_step_pct: dec!(0.01),
            fee_buffer_pct: dec!(0.001),
            ..Config::default()
        };
        let sell = GridPlanner::sell_price(&config, dec!(100), dec!(0.01));
        let min_acceptable = GridPlanner::min_acceptable_sell_price(&config, dec!(100));
        assert!(sell >= min_acceptable);
    }

    #[test]
    fn anchor_rebase_keeps_band_hi_capped_at_grid_top() {
        // Price sequence 100, 101, 102; buffer disabled so grid_top
        // tracks the anchor exactly.
        let config = Config {
            buffer_enabled: false,
            ..Config::default()
        };
        let levels = GridPlanner::desired_levels(&config, &ctx(dec!(102), dec!(102)));
        assert_eq!(levels[0].price, dec!(102) * (Decimal::ONE - config.grid_step_pct));
    }
}
