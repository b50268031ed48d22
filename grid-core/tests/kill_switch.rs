//! The cancel_all kill switch must cancel every OPEN order on a market
//! regardless of RiskGovernor state, including when trading is disabled.

mod common;
use common::*;

use grid_core::config::SizingMode;
use grid_core::domain::OrderStatus;
use grid_core::ExchangeAdapter;
use grid_core::Store;
use rust_decimal_macros::dec;

#[tokio::test]
async fn cancel_all_clears_every_open_order_even_with_trading_disabled() {
    let btc = market("BTC-USD");
    let config = grid_core::config::Config {
        grid_step_pct: dec!(0.01),
        budget_usd: dec!(1000),
        staging_band_depth_pct: dec!(0.05),
        min_band_orders: 3,
        max_band_orders: 3,
        sizing_mode: SizingMode::FixedUsd,
        fixed_usd_per_trade: dec!(100),
        paper_mode: true,
        ..default_config()
    };
    let (engine, exchange, store) = setup(config, &btc);

    exchange.set_ticker(&btc, dec!(100));
    engine.start_market(&btc).await.unwrap();
    engine.process_tick().await.unwrap();

    let open_before = store.list_open_orders(&btc).await.unwrap();
    assert_eq!(open_before.len(), 3);

    // cancel_all never consults the RiskGovernor, so it must clear
    // every resting order even though nothing here re-admits trading.
    let canceled = engine.cancel_all(&btc).await.unwrap();
    assert_eq!(canceled, 3);

    let open_after = store.list_open_orders(&btc).await.unwrap();
    assert!(open_after.is_empty(), "no order should remain OPEN after the kill switch");

    let exchange_open = exchange.list_open_orders(Some(&btc)).await.unwrap();
    assert!(exchange_open.is_empty(), "the exchange side must also show no open orders");
}

#[tokio::test]
async fn cancel_one_is_a_noop_on_an_already_closed_order() {
    let btc = market("BTC-USD");
    let config = grid_core::config::Config {
        grid_step_pct: dec!(0.01),
        staging_band_depth_pct: dec!(0.05),
        min_band_orders: 1,
        max_band_orders: 1,
        sizing_mode: SizingMode::FixedUsd,
        fixed_usd_per_trade: dec!(100),
        paper_mode: true,
        ..default_config()
    };
    let (engine, exchange, store) = setup(config, &btc);
    exchange.set_ticker(&btc, dec!(100));
    engine.start_market(&btc).await.unwrap();
    engine.process_tick().await.unwrap();

    let open = store.list_open_orders(&btc).await.unwrap();
    let order = open.into_iter().next().unwrap();

    let first = engine.cancel_one(&order).await.unwrap();
    assert!(first);

    let mut stale = order.clone();
    stale.status = OrderStatus::Canceled;
    let second = engine.cancel_one(&stale).await.unwrap();
    assert!(!second, "canceling an order that's already non-open should report false, not error");
}
