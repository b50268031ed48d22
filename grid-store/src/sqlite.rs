//! `sqlx`/SQLite-backed `Store`. Money fields are stored as
//! TEXT and round-tripped through `Decimal`'s `Display`/`FromStr` to
//! avoid floating-point drift, matching the teacher's `rust_decimal`-
//! everywhere posture for anything that represents currency.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grid_core::config::Config;
use grid_core::domain::{
    Actor, AuditLogEntry, BotState, ClientTag, EngineMode, Fill, Lot, LotId, LotStatus, Market, MarketId, Order,
    OrderId, OrderStatus, Side,
};
use grid_core::store::{Store, StoreError};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use std::str::FromStr;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { pool })
    }
}

fn parse_decimal(s: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(s).map_err(|e| StoreError::Backend(format!("invalid decimal {s}: {e}")))
}

fn parse_side(s: &str) -> Side {
    if s == "BUY" {
        Side::Buy
    } else {
        Side::Sell
    }
}

fn parse_order_status(s: &str) -> OrderStatus {
    match s {
        "PENDING_PLACE" => OrderStatus::PendingPlace,
        "OPEN" => OrderStatus::Open,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Rejected,
        _ => OrderStatus::Unknown,
    }
}

fn order_status_str(s: OrderStatus) -> &'static str {
    match s {
        OrderStatus::PendingPlace => "PENDING_PLACE",
        OrderStatus::Open => "OPEN",
        OrderStatus::Filled => "FILLED",
        OrderStatus::Canceled => "CANCELED",
        OrderStatus::Rejected => "REJECTED",
        OrderStatus::Unknown => "UNKNOWN",
    }
}

fn lot_status_str(s: LotStatus) -> &'static str {
    match s {
        LotStatus::Open => "OPEN",
        LotStatus::SellPlaced => "SELL_PLACED",
        LotStatus::Closed => "CLOSED",
    }
}

fn parse_lot_status(s: &str) -> LotStatus {
    match s {
        "SELL_PLACED" => LotStatus::SellPlaced,
        "CLOSED" => LotStatus::Closed,
        _ => LotStatus::Open,
    }
}

fn engine_mode_str(m: EngineMode) -> &'static str {
    match m {
        EngineMode::Running => "RUNNING",
        EngineMode::Paused => "PAUSED",
        EngineMode::Hold => "HOLD",
        EngineMode::Stopped => "STOPPED",
    }
}

fn parse_engine_mode(s: &str) -> EngineMode {
    match s {
        "RUNNING" => EngineMode::Running,
        "HOLD" => EngineMode::Hold,
        "PAUSED" => EngineMode::Paused,
        _ => EngineMode::Stopped,
    }
}

fn actor_str(a: Actor) -> &'static str {
    match a {
        Actor::System => "system",
        Actor::User => "user",
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_market(&self, id: &MarketId) -> Result<Option<Market>, StoreError> {
        let row = sqlx::query("SELECT id, enabled, is_favorite, ranking, settings FROM markets WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(match row {
            Some(r) => Some(Market {
                id: MarketId(r.get::<String, _>("id")),
                enabled: r.get::<i64, _>("enabled") != 0,
                is_favorite: r.get::<i64, _>("is_favorite") != 0,
                ranking: r.get::<i64, _>("ranking") as i32,
                settings: serde_json::from_str(&r.get::<String, _>("settings")).unwrap_or(serde_json::Value::Null),
            }),
            None => None,
        })
    }

    async fn list_markets(&self, favorites_only: bool) -> Result<Vec<Market>, StoreError> {
        let query = if favorites_only {
            "SELECT id, enabled, is_favorite, ranking, settings FROM markets WHERE is_favorite = 1"
        } else {
            "SELECT id, enabled, is_favorite, ranking, settings FROM markets"
        };
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|r| Market {
                id: MarketId(r.get::<String, _>("id")),
                enabled: r.get::<i64, _>("enabled") != 0,
                is_favorite: r.get::<i64, _>("is_favorite") != 0,
                ranking: r.get::<i64, _>("ranking") as i32,
                settings: serde_json::from_str(&r.get::<String, _>("settings")).unwrap_or(serde_json::Value::Null),
            })
            .collect())
    }

    async fn upsert_market(&self, market: &Market) -> Result<(), StoreError> {
        let settings = serde_json::to_string(&market.settings).unwrap_or_else(|_| "null".into());
        sqlx::query(
            "INSERT INTO markets (id, enabled, is_favorite, ranking, settings) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET enabled = excluded.enabled, is_favorite = excluded.is_favorite,
             ranking = excluded.ranking, settings = excluded.settings",
        )
        .bind(&market.id.0)
        .bind(market.enabled as i64)
        .bind(market.is_favorite as i64)
        .bind(market.ranking as i64)
        .bind(settings)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                StoreError::Conflict("another market is already enabled (Highlander)".into())
            } else {
                StoreError::Backend(e.to_string())
            }
        })?;
        Ok(())
    }

    async fn get_enabled_market(&self) -> Result<Option<Market>, StoreError> {
        let row = sqlx::query("SELECT id, enabled, is_favorite, ranking, settings FROM markets WHERE enabled = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(row.map(|r| Market {
            id: MarketId(r.get::<String, _>("id")),
            enabled: true,
            is_favorite: r.get::<i64, _>("is_favorite") != 0,
            ranking: r.get::<i64, _>("ranking") as i32,
            settings: serde_json::from_str(&r.get::<String, _>("settings")).unwrap_or(serde_json::Value::Null),
        }))
    }

    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO orders (id, client_tag, market_id, side, price, size, status, created_at, lot_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&order.id.0)
        .bind(&order.client_tag.0)
        .bind(&order.market_id.0)
        .bind(order.side.to_string())
        .bind(order.price.to_string())
        .bind(order.size.to_string())
        .bind(order_status_str(order.status))
        .bind(order.created_at.to_rfc3339())
        .bind(order.lot_id.map(|l| l.0))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                StoreError::Conflict(format!("client_tag {} already exists", order.client_tag))
            } else {
                StoreError::Backend(e.to_string())
            }
        })?;
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<(), StoreError> {
        sqlx::query("UPDATE orders SET status = ?, lot_id = ? WHERE id = ?")
            .bind(order_status_str(order.status))
            .bind(order.lot_id.map(|l| l.0))
            .bind(&order.id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_order(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(
            "SELECT id, client_tag, market_id, side, price, size, status, created_at, lot_id FROM orders WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        row.map(row_to_order).transpose()
    }

    async fn get_order_by_client_tag(&self, client_tag: &ClientTag) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(
            "SELECT id, client_tag, market_id, side, price, size, status, created_at, lot_id FROM orders WHERE client_tag = ?",
        )
        .bind(&client_tag.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        row.map(row_to_order).transpose()
    }

    async fn list_open_orders(&self, market_id: &MarketId) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, client_tag, market_id, side, price, size, status, created_at, lot_id
             FROM orders WHERE market_id = ? AND status = 'OPEN'",
        )
        .bind(&market_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.into_iter().map(row_to_order).collect()
    }

    async fn count_open_orders(&self) -> Result<u32, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) as c FROM orders WHERE status = 'OPEN'")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(row.get::<i64, _>("c") as u32)
    }

    async fn list_orders_by_status(
        &self,
        market_id: &MarketId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT id, client_tag, market_id, side, price, size, status, created_at, lot_id
                     FROM orders WHERE market_id = ? AND status = ?",
                )
                .bind(&market_id.0)
                .bind(order_status_str(status))
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT id, client_tag, market_id, side, price, size, status, created_at, lot_id
                     FROM orders WHERE market_id = ?",
                )
                .bind(&market_id.0)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.into_iter().map(row_to_order).collect()
    }

    async fn record_fill(&self, fill: &Fill) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO fills (id, order_id, market_id, side, price, size, fee, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) ON CONFLICT(id) DO NOTHING",
        )
        .bind(&fill.id)
        .bind(&fill.order_id.0)
        .bind(&fill.market_id.0)
        .bind(fill.side.to_string())
        .bind(fill.price.to_string())
        .bind(fill.size.to_string())
        .bind(fill.fee.to_string())
        .bind(fill.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_fills(&self, limit: u32, skip: u32) -> Result<Vec<Fill>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, order_id, market_id, side, price, size, fee, timestamp FROM fills
             ORDER BY timestamp DESC LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(skip as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.into_iter().map(row_to_fill).collect()
    }

    async fn insert_lot(&self, lot: &Lot) -> Result<LotId, StoreError> {
        let result = sqlx::query(
            "INSERT INTO lots (market_id, buy_order_id, buy_price, buy_size, buy_fee, buy_time, sell_order_id, sell_price,
             sell_time, realized_pnl, status) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&lot.market_id.0)
        .bind(&lot.buy_order_id.0)
        .bind(lot.buy_price.to_string())
        .bind(lot.buy_size.to_string())
        .bind(lot.buy_fee.to_string())
        .bind(lot.buy_time.to_rfc3339())
        .bind(lot.sell_order_id.as_ref().map(|o| o.0.clone()))
        .bind(lot.sell_price.map(|p| p.to_string()))
        .bind(lot.sell_time.map(|t| t.to_rfc3339()))
        .bind(lot.realized_pnl.map(|p| p.to_string()))
        .bind(lot_status_str(lot.status))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(LotId(result.last_insert_rowid()))
    }

    async fn update_lot(&self, lot: &Lot) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE lots SET sell_order_id = ?, sell_price = ?, sell_time = ?, realized_pnl = ?, status = ?
             WHERE id = ?",
        )
        .bind(lot.sell_order_id.as_ref().map(|o| o.0.clone()))
        .bind(lot.sell_price.map(|p| p.to_string()))
        .bind(lot.sell_time.map(|t| t.to_rfc3339()))
        .bind(lot.realized_pnl.map(|p| p.to_string()))
        .bind(lot_status_str(lot.status))
        .bind(lot.id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_lot(&self, id: LotId) -> Result<Option<Lot>, StoreError> {
        let row = sqlx::query(
            "SELECT id, market_id, buy_order_id, buy_price, buy_size, buy_fee, buy_time, sell_order_id, sell_price,
             sell_time, realized_pnl, status FROM lots WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        row.map(row_to_lot).transpose()
    }

    async fn get_lot_by_buy_order(&self, order_id: &OrderId) -> Result<Option<Lot>, StoreError> {
        let row = sqlx::query(
            "SELECT id, market_id, buy_order_id, buy_price, buy_size, buy_fee, buy_time, sell_order_id, sell_price,
             sell_time, realized_pnl, status FROM lots WHERE buy_order_id = ?",
        )
        .bind(&order_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        row.map(row_to_lot).transpose()
    }

    async fn get_lot_by_sell_order(&self, order_id: &OrderId) -> Result<Option<Lot>, StoreError> {
        let row = sqlx::query(
            "SELECT id, market_id, buy_order_id, buy_price, buy_size, buy_fee, buy_time, sell_order_id, sell_price,
             sell_time, realized_pnl, status FROM lots WHERE sell_order_id = ?",
        )
        .bind(&order_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        row.map(row_to_lot).transpose()
    }

    async fn list_lots_awaiting_sell(&self, market_id: &MarketId) -> Result<Vec<Lot>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, market_id, buy_order_id, buy_price, buy_size, buy_fee, buy_time, sell_order_id, sell_price,
             sell_time, realized_pnl, status FROM lots WHERE market_id = ? AND status = 'OPEN'",
        )
        .bind(&market_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.into_iter().map(row_to_lot).collect()
    }

    async fn list_lots(&self, limit: u32, skip: u32) -> Result<Vec<Lot>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, market_id, buy_order_id, buy_price, buy_size, buy_fee, buy_time, sell_order_id, sell_price,
             sell_time, realized_pnl, status FROM lots ORDER BY buy_time DESC LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(skip as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.into_iter().map(row_to_lot).collect()
    }

    async fn get_bot_state(&self, market_id: &MarketId) -> Result<Option<BotState>, StoreError> {
        let row = sqlx::query("SELECT market_id, anchor_high, mode, last_tick_at FROM bot_state WHERE market_id = ?")
            .bind(&market_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        row.map(|r| {
            Ok(BotState {
                market_id: MarketId(r.get::<String, _>("market_id")),
                anchor_high: parse_decimal(&r.get::<String, _>("anchor_high"))?,
                mode: parse_engine_mode(&r.get::<String, _>("mode")),
                last_tick_at: r
                    .get::<Option<String>, _>("last_tick_at")
                    .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
                    .transpose()
                    .map_err(|e| StoreError::Backend(e.to_string()))?,
            })
        })
        .transpose()
    }

    async fn put_bot_state(&self, state: &BotState) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO bot_state (market_id, anchor_high, mode, last_tick_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(market_id) DO UPDATE SET anchor_high = excluded.anchor_high, mode = excluded.mode,
             last_tick_at = excluded.last_tick_at",
        )
        .bind(&state.market_id.0)
        .bind(state.anchor_high.to_string())
        .bind(engine_mode_str(state.mode))
        .bind(state.last_tick_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_config(&self) -> Result<Option<Config>, StoreError> {
        let row = sqlx::query("SELECT data FROM config WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        row.map(|r| {
            serde_json::from_str(&r.get::<String, _>("data")).map_err(|e| StoreError::Backend(e.to_string()))
        })
        .transpose()
    }

    async fn put_config(&self, config: &Config) -> Result<(), StoreError> {
        let data = serde_json::to_string(config).map_err(|e| StoreError::Backend(e.to_string()))?;
        sqlx::query(
            "INSERT INTO config (id, data) VALUES (1, ?) ON CONFLICT(id) DO UPDATE SET data = excluded.data",
        )
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn append_audit_log(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO audit_log (timestamp, actor, action, before, after) VALUES (?, ?, ?, ?, ?)")
            .bind(entry.timestamp.to_rfc3339())
            .bind(actor_str(entry.actor))
            .bind(&entry.action)
            .bind(entry.before.to_string())
            .bind(entry.after.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn last_fill_at(&self, market_id: &MarketId) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = sqlx::query("SELECT MAX(timestamp) as ts FROM fills WHERE market_id = ?")
            .bind(&market_id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        row.get::<Option<String>, _>("ts")
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
            .transpose()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

fn row_to_order(r: sqlx::sqlite::SqliteRow) -> Result<Order, StoreError> {
    Ok(Order {
        id: OrderId(r.get::<String, _>("id")),
        client_tag: ClientTag(r.get::<String, _>("client_tag")),
        market_id: MarketId(r.get::<String, _>("market_id")),
        side: parse_side(&r.get::<String, _>("side")),
        price: parse_decimal(&r.get::<String, _>("price"))?,
        size: parse_decimal(&r.get::<String, _>("size"))?,
        status: parse_order_status(&r.get::<String, _>("status")),
        created_at: DateTime::parse_from_rfc3339(&r.get::<String, _>("created_at"))
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .with_timezone(&Utc),
        lot_id: r.get::<Option<i64>, _>("lot_id").map(LotId),
    })
}

fn row_to_fill(r: sqlx::sqlite::SqliteRow) -> Result<Fill, StoreError> {
    Ok(Fill {
        id: r.get::<String, _>("id"),
        order_id: OrderId(r.get::<String, _>("order_id")),
        market_id: MarketId(r.get::<String, _>("market_id")),
        side: parse_side(&r.get::<String, _>("side")),
        price: parse_decimal(&r.get::<String, _>("price"))?,
        size: parse_decimal(&r.get::<String, _>("size"))?,
        fee: parse_decimal(&r.get::<String, _>("fee"))?,
        timestamp: DateTime::parse_from_rfc3339(&r.get::<String, _>("timestamp"))
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .with_timezone(&Utc),
    })
}

fn row_to_lot(r: sqlx::sqlite::SqliteRow) -> Result<Lot, StoreError> {
    Ok(Lot {
        id: LotId(r.get::<i64, _>("id")),
        market_id: MarketId(r.get::<String, _>("market_id")),
        buy_order_id: OrderId(r.get::<String, _>("buy_order_id")),
        buy_price: parse_decimal(&r.get::<String, _>("buy_price"))?,
        buy_size: parse_decimal(&r.get::<String, _>("buy_size"))?,
        buy_fee: parse_decimal(&r.get::<String, _>("buy_fee"))?,
        buy_time: DateTime::parse_from_rfc3339(&r.get::<String, _>("buy_time"))
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .with_timezone(&Utc),
        sell_order_id: r.get::<Option<String>, _>("sell_order_id").map(OrderId),
        sell_price: r
            .get::<Option<String>, _>("sell_price")
            .map(|s| parse_decimal(&s))
            .transpose()?,
        sell_time: r
            .get::<Option<String>, _>("sell_time")
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
            .transpose()
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        realized_pnl: r
            .get::<Option<String>, _>("realized_pnl")
            .map(|s| parse_decimal(&s))
            .transpose()?,
        status: parse_lot_status(&r.get::<String, _>("status")),
    })
}
