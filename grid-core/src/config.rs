//! Runtime configuration for the grid engine.
//!
//! Unlike the teacher crate's compile-time, feature-gated risk limits,
//! this config is a runtime singleton: the REST surface can replace it
//! wholesale (`POST /api/config/`), and changes must be all-or-nothing —
//! see `ConfigError`. It is held by callers behind an
//! `arc_swap::ArcSwap<Config>` so a hot-swap never blocks a tick.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfitMode {
    Step,
    StepReinvest,
    Custom,
    SmartReinvest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizingMode {
    BudgetSplit,
    FixedUsd,
    CapitalPct,
}

/// Which balance `RiskGovernor::deployed_capital` treats as committed
/// capital. `Strict` is the default used everywhere in this crate;
/// `BalanceOnly` is kept so both readings remain testable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeployedCapitalBasis {
    /// USD notional of OPEN buys + cost basis of OPEN lots.
    Strict,
    /// USD balance committed only (ignores resting inventory cost basis).
    BalanceOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub grid_step_pct: Decimal,
    pub budget_usd: Decimal,
    pub max_open_orders: u32,
    pub buffer_enabled: bool,
    pub buffer_pct: Decimal,
    pub staging_band_depth_pct: Decimal,
    pub min_band_orders: u32,
    pub max_band_orders: u32,
    pub profit_mode: ProfitMode,
    pub custom_profit_pct: Decimal,
    pub monthly_profit_target_usd: Decimal,
    pub sizing_mode: SizingMode,
    pub fixed_usd_per_trade: Decimal,
    pub capital_pct_per_trade: Decimal,
    pub live_trading_enabled: bool,
    pub paper_mode: bool,
    pub fee_buffer_pct: Decimal,
    pub max_grid_capital_pct: Decimal,
    pub smart_reinvest_conservative_multiplier: Decimal,
    pub reconcile_batch_size: u32,
    pub tick_period_ms: u64,
    pub deployed_capital_basis: DeployedCapitalBasis,
}

/// Hard ceiling on `max_open_orders`, enforced regardless of config input.
pub const MAX_OPEN_ORDERS_CEILING: u32 = 490;

impl Default for Config {
    fn default() -> Self {
        Self {
            grid_step_pct: dec!(0.01),
            budget_usd: dec!(1000),
            max_open_orders: 25,
            buffer_enabled: false,
            buffer_pct: dec!(0.0),
            staging_band_depth_pct: dec!(0.05),
            min_band_orders: 10,
            max_band_orders: 25,
            profit_mode: ProfitMode::Step,
            custom_profit_pct: dec!(0.02),
            monthly_profit_target_usd: dec!(1000),
            sizing_mode: SizingMode::BudgetSplit,
            fixed_usd_per_trade: dec!(50),
            capital_pct_per_trade: dec!(5),
            live_trading_enabled: false,
            paper_mode: true,
            fee_buffer_pct: dec!(0.001),
            max_grid_capital_pct: dec!(0.70),
            smart_reinvest_conservative_multiplier: dec!(0.5),
            reconcile_batch_size: 10,
            tick_period_ms: 2000,
            deployed_capital_basis: DeployedCapitalBasis::Strict,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("grid_step_pct must be > 0 (got {0}); a zero step produces infinitely many identical levels")]
    ZeroGridStep(Decimal),
    #[error("max_open_orders {0} exceeds the hard ceiling of {MAX_OPEN_ORDERS_CEILING}")]
    MaxOpenOrdersTooHigh(u32),
    #[error("max_open_orders must be > 0")]
    MaxOpenOrdersZero,
    #[error("min_band_orders ({min}) must be <= max_band_orders ({max})")]
    BandOrderBoundsInverted { min: u32, max: u32 },
    #[error("budget_usd must be > 0 (got {0})")]
    NonPositiveBudget(Decimal),
    #[error("staging_band_depth_pct must be in [0, 1) (got {0})")]
    InvalidBandDepth(Decimal),
    #[error("max_grid_capital_pct must be in (0, 1] (got {0})")]
    InvalidMaxGridCapitalPct(Decimal),
    #[error("fee_buffer_pct ({fee_buffer_pct}) >= grid_step_pct ({grid_step_pct}) would force every sell below the buy price")]
    FeesExceedStep {
        fee_buffer_pct: Decimal,
        grid_step_pct: Decimal,
    },
    #[error("reconcile_batch_size must be > 0")]
    ReconcileBatchSizeZero,
}

impl fmt::Display for ProfitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProfitMode::Step => "STEP",
            ProfitMode::StepReinvest => "STEP_REINVEST",
            ProfitMode::Custom => "CUSTOM",
            ProfitMode::SmartReinvest => "SMART_REINVEST",
        };
        write!(f, "{s}")
    }
}

impl Config {
    /// Validates cross-field invariants. Called on load and on every
    /// `POST /api/config/` before the swap is committed, so a bad write
    /// never reaches the running engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_step_pct <= Decimal::ZERO {
            return Err(ConfigError::ZeroGridStep(self.grid_step_pct));
        }
        if self.max_open_orders == 0 {
            return Err(ConfigError::MaxOpenOrdersZero);
        }
        if self.max_open_orders > MAX_OPEN_ORDERS_CEILING {
            return Err(ConfigError::MaxOpenOrdersTooHigh(self.max_open_orders));
        }
        if self.reconcile_batch_size == 0 {
            return Err(ConfigError::ReconcileBatchSizeZero);
        }
        if self.min_band_orders > self.max_band_orders {
            return Err(ConfigError::BandOrderBoundsInverted {
                min: self.min_band_orders,
                max: self.max_band_orders,
            });
        }
        if self.budget_usd <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveBudget(self.budget_usd));
        }
        if self.staging_band_depth_pct < Decimal::ZERO || self.staging_band_depth_pct >= Decimal::ONE {
            return Err(ConfigError::InvalidBandDepth(self.staging_band_depth_pct));
        }
        if self.max_grid_capital_pct <= Decimal::ZERO || self.max_grid_capital_pct > Decimal::ONE {
            return Err(ConfigError::InvalidMaxGridCapitalPct(self.max_grid_capital_pct));
        }
        if matches!(self.profit_mode, ProfitMode::Step | ProfitMode::StepReinvest)
            && self.fee_buffer_pct >= self.grid_step_pct
        {
            return Err(ConfigError::FeesExceedStep {
                fee_buffer_pct: self.fee_buffer_pct,
                grid_step_pct: self.grid_step_pct,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn zero_step_rejected() {
        let mut cfg = Config::default();
        cfg.grid_step_pct = Decimal::ZERO;
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroGridStep(_))));
    }

    #[test]
    fn max_open_orders_ceiling_enforced() {
        let mut cfg = Config::default();
        cfg.max_open_orders = 491;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::MaxOpenOrdersTooHigh(491))
        ));
    }

    #[test]
    fn fees_exceeding_step_rejected_for_step_mode() {
        let mut cfg = Config::default();
        cfg.grid_step_pct = dec!(0.01);
        cfg.fee_buffer_pct = dec!(0.02);
        assert!(matches!(cfg.validate(), Err(ConfigError::FeesExceedStep { .. })));
    }

    #[test]
    fn inverted_band_bounds_rejected() {
        let mut cfg = Config::default();
        cfg.min_band_orders = 30;
        cfg.max_band_orders = 10;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::BandOrderBoundsInverted { .. })
        ));
    }
}
