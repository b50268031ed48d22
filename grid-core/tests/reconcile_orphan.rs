//! Startup reconciliation must classify the three order sets
//! correctly: matched (present on both sides), orphan-exchange
//! (foreign order, canceled), orphan-local (stale local row, marked
//! CANCELED so it stops counting against the order cap).

mod common;
use common::*;

use chrono::Utc;
use grid_core::domain::{ClientTag, MarketId, Order, OrderId, OrderStatus, Side};
use grid_core::reconciler::Reconciler;
use grid_core::{ExchangeAdapter, Store};
use rust_decimal_macros::dec;
use std::sync::Arc;

fn order(id: &str, market_id: &MarketId, tag: &str) -> Order {
    Order {
        id: OrderId::from(id),
        client_tag: ClientTag(tag.to_string()),
        market_id: market_id.clone(),
        side: Side::Buy,
        price: dec!(100),
        size: dec!(0.01),
        status: OrderStatus::Open,
        created_at: Utc::now(),
        lot_id: None,
    }
}

#[tokio::test]
async fn classifies_matched_and_both_orphan_kinds() {
    let btc = market("BTC-USD");
    let (_engine, exchange, store) = setup(default_config(), &btc);
    exchange.set_ticker(&btc, dec!(100));

    // Matched: known to both sides. The mock adapter assigns its own
    // order ids, so place it there first and mirror the real id locally.
    let real_matched_id = exchange
        .place_limit_order(&btc, Side::Buy, dec!(100), dec!(0.01), &ClientTag("buy-BTC-USD-0".into()), true)
        .await
        .unwrap();
    store
        .insert_order(&Order { id: real_matched_id, ..order("unused", &btc, "buy-BTC-USD-0") })
        .await
        .unwrap();

    // Orphan-exchange: the adapter knows about it, we never recorded it.
    exchange
        .place_limit_order(&btc, Side::Buy, dec!(99), dec!(0.01), &ClientTag("foreign".into()), true)
        .await
        .unwrap();

    // Orphan-local: our DB thinks it's open, the exchange has no record.
    let orphan_local = order("ghost-1", &btc, "buy-BTC-USD-9");
    store.insert_order(&orphan_local).await.unwrap();

    let reconciler = Reconciler::new(store.clone() as Arc<dyn Store>, exchange.clone() as Arc<dyn grid_core::ExchangeAdapter>);
    let report = reconciler.reconcile_startup(&btc).await.unwrap();

    assert_eq!(report.matched, 1);
    assert_eq!(report.orphan_exchange_canceled, 1);
    assert_eq!(report.orphan_local_marked_canceled, 1);
    assert_eq!(report.orphan_local_marked_filled, 0);

    let ghost = store.get_order(&OrderId::from("ghost-1")).await.unwrap().unwrap();
    assert_eq!(ghost.status, OrderStatus::Canceled);

    let exch_open_after = exchange.list_open_orders(Some(&btc)).await.unwrap();
    assert_eq!(exch_open_after.len(), 1, "only the matched order should remain open on the exchange");
}
