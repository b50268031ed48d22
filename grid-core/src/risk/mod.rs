//! Pre-trade risk governance.
//!
//! `RiskGovernor` is a pure decision function: given the current config,
//! open-order count and deployed capital, it admits or denies a candidate
//! action. It never places or cancels an order itself.

use crate::config::{Config, DeployedCapitalBasis};
use crate::domain::{EngineMode, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Denial {
    MaxOpenOrdersReached,
    MarketSoftCapReached,
    BudgetExceeded,
    TradingDisabled,
    EngineNotRunning,
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Denial::MaxOpenOrdersReached => "max_open_orders reached",
            Denial::MarketSoftCapReached => "per-market soft cap reached",
            Denial::BudgetExceeded => "budget * max_grid_capital_pct would be exceeded",
            Denial::TradingDisabled => "live_trading_enabled is false and paper_mode is false",
            Denial::EngineNotRunning => "engine is PAUSED or STOPPED",
        };
        write!(f, "{s}")
    }
}

/// Not an error: a denial is a planned decision, logged at INFO with
/// its reason, not propagated as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskVerdict {
    Admitted,
    Denied(Denial),
}

impl RiskVerdict {
    pub fn is_admitted(self) -> bool {
        matches!(self, RiskVerdict::Admitted)
    }
}

/// Snapshot of process-wide order/capital state the governor needs to
/// decide; assembled by the Engine once per tick from the Store.
#[derive(Debug, Clone, Copy)]
pub struct RiskContext {
    pub total_open_orders: u32,
    pub active_market_count: u32,
    /// USD notional of OPEN buy orders on the active market.
    pub open_buy_notional_usd: Decimal,
    /// Cost basis (buy_price * buy_size) of all OPEN/SELL_PLACED lots.
    pub open_lot_cost_basis_usd: Decimal,
    /// Raw USD account balance, used only under `BalanceOnly` basis.
    pub usd_balance: Decimal,
    pub engine_mode: EngineMode,
}

pub struct RiskGovernor;

impl RiskGovernor {
    /// Capital already committed, per `Config::deployed_capital_basis`.
    pub fn deployed_capital(config: &Config, ctx: &RiskContext) -> Decimal {
        match config.deployed_capital_basis {
            DeployedCapitalBasis::Strict => ctx.open_buy_notional_usd + ctx.open_lot_cost_basis_usd,
            DeployedCapitalBasis::BalanceOnly => config.budget_usd - ctx.usd_balance,
        }
    }

    pub fn soft_cap_per_market(config: &Config, ctx: &RiskContext) -> u32 {
        if ctx.active_market_count == 0 {
            return config.max_open_orders;
        }
        config.max_open_orders / ctx.active_market_count
    }

    pub fn in_hold(config: &Config, ctx: &RiskContext) -> bool {
        Self::deployed_capital(config, ctx) >= config.budget_usd * config.max_grid_capital_pct
    }

    /// Admit or deny a single candidate order placement.
    pub fn evaluate_placement(
        config: &Config,
        ctx: &RiskContext,
        side: Side,
        notional_usd: Decimal,
    ) -> RiskVerdict {
        if !config.live_trading_enabled && !config.paper_mode {
            return RiskVerdict::Denied(Denial::TradingDisabled);
        }
        if matches!(ctx.engine_mode, EngineMode::Paused | EngineMode::Stopped) {
            return RiskVerdict::Denied(Denial::EngineNotRunning);
        }
        if ctx.total_open_orders >= config.max_open_orders {
            return RiskVerdict::Denied(Denial::MaxOpenOrdersReached);
        }
        let soft_cap = Self::soft_cap_per_market(config, ctx);
        if ctx.total_open_orders >= soft_cap {
            return RiskVerdict::Denied(Denial::MarketSoftCapReached);
        }

        // In HOLD, SELLs are still admitted; only BUYs are denied on budget.
        if side == Side::Buy {
            let deployed = Self::deployed_capital(config, ctx);
            if deployed + notional_usd > config.budget_usd * config.max_grid_capital_pct {
                return RiskVerdict::Denied(Denial::BudgetExceeded);
            }
        }

        RiskVerdict::Admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use rust_decimal_macros::dec;

    fn base_ctx() -> RiskContext {
        RiskContext {
            total_open_orders: 0,
            active_market_count: 1,
            open_buy_notional_usd: dec!(0),
            open_lot_cost_basis_usd: dec!(0),
            usd_balance: dec!(1000),
            engine_mode: EngineMode::Running,
        }
    }

    #[test]
    fn denies_when_max_open_orders_reached() {
        let config = Config {
            max_open_orders: 5,
            ..Config::default()
        };
        let ctx = RiskContext {
            total_open_orders: 5,
            ..base_ctx()
        };
        assert_eq!(
            RiskGovernor::evaluate_placement(&config, &ctx, Side::Buy, dec!(10)),
            RiskVerdict::Denied(Denial::MaxOpenOrdersReached)
        );
    }

    #[test]
    fn denies_buy_over_budget_but_admits_sell_in_hold() {
        let config = Config {
            budget_usd: dec!(1000),
            max_grid_capital_pct: dec!(0.5),
            ..Config::default()
        };
        let ctx = RiskContext {
            open_buy_notional_usd: dec!(500),
            ..base_ctx()
        };
        assert!(RiskGovernor::in_hold(&config, &ctx));
        assert_eq!(
            RiskGovernor::evaluate_placement(&config, &ctx, Side::Buy, dec!(1)),
            RiskVerdict::Denied(Denial::BudgetExceeded)
        );
        assert_eq!(
            RiskGovernor::evaluate_placement(&config, &ctx, Side::Sell, dec!(1)),
            RiskVerdict::Admitted
        );
    }

    #[test]
    fn denies_when_neither_live_nor_paper() {
        let config = Config {
            live_trading_enabled: false,
            paper_mode: false,
            ..Config::default()
        };
        assert_eq!(
            RiskGovernor::evaluate_placement(&config, &base_ctx(), Side::Buy, dec!(1)),
            RiskVerdict::Denied(Denial::TradingDisabled)
        );
    }

    #[test]
    fn denies_when_paused_or_stopped() {
        let config = Config::default();
        let ctx = RiskContext {
            engine_mode: EngineMode::Paused,
            ..base_ctx()
        };
        assert_eq!(
            RiskGovernor::evaluate_placement(&config, &ctx, Side::Buy, dec!(1)),
            RiskVerdict::Denied(Denial::EngineNotRunning)
        );
    }

    #[test]
    fn soft_cap_equals_max_open_orders_under_highlander() {
        let config = Config {
            max_open_orders: 25,
            ..Config::default()
        };
        assert_eq!(RiskGovernor::soft_cap_per_market(&config, &base_ctx()), 25);
    }

    #[test]
    fn balance_only_basis_uses_budget_minus_balance() {
        let config = Config {
            budget_usd: dec!(1000),
            deployed_capital_basis: DeployedCapitalBasis::BalanceOnly,
            ..Config::default()
        };
        let ctx = RiskContext {
            usd_balance: dec!(600),
            ..base_ctx()
        };
        assert_eq!(RiskGovernor::deployed_capital(&config, &ctx), dec!(400));
    }
}
