//! Non-blocking fan-out to WebSocket subscribers.
//!
//! Each subscriber gets its own bounded `tokio::sync::mpsc` channel of
//! depth `Q`. Price updates are lossy under backpressure; fills and
//! state transitions are never dropped — if a subscriber's queue is
//! full of those, it is disconnected instead.

use crate::domain::{EngineMode, Fill, MarketId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::warn;

/// Default per-subscriber queue depth.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    #[serde(rename = "PRICE_UPDATE")]
    PriceUpdate {
        market_id: MarketId,
        price: Decimal,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "ORDER_FILLED")]
    OrderFilled { fill: Fill },
    #[serde(rename = "STATE_CHANGE")]
    StateChange {
        market_id: MarketId,
        mode: EngineMode,
    },
    #[serde(rename = "LOG_ENTRY")]
    LogEntry { level: String, message: String },
}

impl Event {
    /// Price updates may be dropped under backpressure; everything else
    /// must reach the subscriber or disconnect it.
    fn is_droppable(&self) -> bool {
        matches!(self, Event::PriceUpdate { .. })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("subscriber {0} disconnected: queue full of non-droppable events")]
pub struct Backpressure(pub u64);

/// In-process pub/sub; `grid-api` owns the axum WebSocket handlers that
/// drain each subscriber's receiver.
pub struct EventBus {
    subscribers: DashMap<u64, mpsc::Sender<Event>>,
    next_id: AtomicU64,
    queue_depth: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_queue_depth(DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_queue_depth(queue_depth: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_depth,
        }
    }

    /// Registers a new subscriber and returns its id plus a receiver the
    /// caller (the WebSocket task) drains.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.remove(&id);
    }

    /// Publishes to every subscriber. Droppable events use `try_send`
    /// and are silently discarded on a full queue; non-droppable events
    /// also use `try_send`, but a full queue disconnects the subscriber
    /// rather than blocking the tick loop — the tick loop never
    /// suspends on a WebSocket send.
    pub fn publish(&self, event: Event) {
        let droppable = event.is_droppable();
        let mut to_remove = Vec::new();
        for entry in self.subscribers.iter() {
            match entry.value().try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    if droppable {
                        continue;
                    }
                    warn!(subscriber = entry.key(), "disconnecting backpressured subscriber");
                    to_remove.push(*entry.key());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    to_remove.push(*entry.key());
                }
            }
        }
        for id in to_remove {
            self.subscribers.remove(&id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn price_event() -> Event {
        Event::PriceUpdate {
            market_id: MarketId::from("BTC-USD"),
            price: dec!(100),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let (_, mut rx) = bus.subscribe();
        bus.publish(price_event());
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, Event::PriceUpdate { .. }));
    }

    #[tokio::test]
    async fn price_updates_are_dropped_when_queue_full() {
        let bus = EventBus::with_queue_depth(1);
        let (_, mut rx) = bus.subscribe();
        bus.publish(price_event());
        bus.publish(price_event()); // queue full, silently dropped
        assert_eq!(bus.subscriber_count(), 1);
        rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn non_droppable_event_disconnects_backpressured_subscriber() {
        let bus = EventBus::with_queue_depth(1);
        let (_id, _rx) = bus.subscribe();
        bus.publish(Event::StateChange {
            market_id: MarketId::from("BTC-USD"),
            mode: EngineMode::Running,
        });
        bus.publish(Event::StateChange {
            market_id: MarketId::from("BTC-USD"),
            mode: EngineMode::Hold,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_subscriber() {
        let bus = EventBus::new();
        let (id, _rx) = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        bus.unsubscribe(id);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
