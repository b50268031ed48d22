//! Live/REST `ExchangeAdapter` for Coinbase Advanced Trade. Request
//! signing follows the HMAC-SHA256 + base64 pattern the corpus uses for
//! exchange auth (see the teacher-adjacent Binance signer in
//! `brbtavares-tucano`), adapted to Coinbase's header names and to
//! signing the raw request body rather than a URL-encoded query string.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use grid_core::domain::{ClientTag, Fill, MarketId, Order, OrderId, OrderStatus, Side};
use grid_core::exchange::{CancelOutcome, ExchangeAdapter, ExchangeError, Product};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const BASE_URL: &str = "https://api.coinbase.com";

/// Holds exchange credentials. `Debug` is hand-written to redact the
/// secret so a stray `{:?}` in a log line never leaks it.
#[derive(Clone)]
struct Credentials {
    api_key: String,
    api_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

pub struct CoinbaseAdapter {
    http: reqwest::Client,
    credentials: Credentials,
}

#[derive(Debug, Deserialize)]
struct CoinbaseProduct {
    product_id: String,
    base_increment: Decimal,
    quote_increment: Decimal,
    base_min_size: Decimal,
}

#[derive(Debug, Deserialize)]
struct ProductsResponse {
    products: Vec<CoinbaseProduct>,
}

impl CoinbaseAdapter {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .expect("reqwest client builds with default TLS config"),
            credentials: Credentials { api_key, api_secret },
        }
    }

    fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> String {
        let message = format!("{timestamp}{method}{path}{body}");
        let mut mac = HmacSha256::new_from_slice(self.credentials.api_secret.as_bytes())
            .expect("HMAC accepts a key of any length");
        mac.update(message.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    async fn signed_request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &str,
    ) -> Result<reqwest::Response, ExchangeError> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(&timestamp, method.as_str(), path, body);
        let url = format!("{BASE_URL}{path}");

        let mut builder = self
            .http
            .request(method, &url)
            .header("CB-ACCESS-KEY", &self.credentials.api_key)
            .header("CB-ACCESS-SIGN", signature)
            .header("CB-ACCESS-TIMESTAMP", &timestamp)
            .header("Content-Type", "application/json");
        if !body.is_empty() {
            builder = builder.body(body.to_string());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ExchangeError::Timeout(DEFAULT_TIMEOUT)
            } else {
                ExchangeError::Transient { reason: e.to_string() }
            }
        })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ExchangeError::Transient {
                reason: format!("http {status}"),
            });
        }
        if status.is_client_error() {
            return Err(ExchangeError::Permanent {
                reason: format!("http {status}"),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ExchangeAdapter for CoinbaseAdapter {
    async fn get_products(&self) -> Result<Vec<Product>, ExchangeError> {
        let response = self
            .signed_request(reqwest::Method::GET, "/api/v3/brokerage/products", "")
            .await?;
        let parsed: ProductsResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::Permanent { reason: e.to_string() })?;
        Ok(parsed
            .products
            .into_iter()
            .map(|p| Product {
                id: MarketId::from(p.product_id),
                base_increment: p.base_increment,
                quote_increment: p.quote_increment,
                min_size: p.base_min_size,
            })
            .collect())
    }

    async fn get_balances(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        #[derive(Deserialize)]
        struct AccountsResponse {
            accounts: Vec<AccountEntry>,
        }
        #[derive(Deserialize)]
        struct AccountEntry {
            currency: String,
            available_balance: AvailableBalance,
        }
        #[derive(Deserialize)]
        struct AvailableBalance {
            value: Decimal,
        }

        let response = self
            .signed_request(reqwest::Method::GET, "/api/v3/brokerage/accounts", "")
            .await?;
        let parsed: AccountsResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::Permanent { reason: e.to_string() })?;
        Ok(parsed
            .accounts
            .into_iter()
            .map(|a| (a.currency, a.available_balance.value))
            .collect())
    }

    async fn get_ticker(&self, market_id: &MarketId) -> Result<Decimal, ExchangeError> {
        #[derive(Deserialize)]
        struct TickerResponse {
            price: Decimal,
        }
        let path = format!("/api/v3/brokerage/products/{market_id}/ticker");
        let response = self.signed_request(reqwest::Method::GET, &path, "").await?;
        let parsed: TickerResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::Permanent { reason: e.to_string() })?;
        Ok(parsed.price)
    }

    async fn place_limit_order(
        &self,
        market_id: &MarketId,
        side: Side,
        price: Decimal,
        size: Decimal,
        client_tag: &ClientTag,
        post_only: bool,
    ) -> Result<OrderId, ExchangeError> {
        #[derive(serde::Serialize)]
        struct LimitOrderConfig {
            base_size: String,
            limit_price: String,
            post_only: bool,
        }
        #[derive(serde::Serialize)]
        struct OrderConfiguration {
            limit_limit_gtc: LimitOrderConfig,
        }
        #[derive(serde::Serialize)]
        struct PlaceOrderRequest<'a> {
            client_order_id: &'a str,
            product_id: &'a str,
            side: &'a str,
            order_configuration: OrderConfiguration,
        }
        #[derive(Deserialize)]
        struct PlaceOrderResponse {
            success: bool,
            order_id: Option<String>,
            failure_reason: Option<String>,
        }

        let body = serde_json::to_string(&PlaceOrderRequest {
            client_order_id: &client_tag.0,
            product_id: &market_id.0,
            side: match side {
                Side::Buy => "BUY",
                Side::Sell => "SELL",
            },
            order_configuration: OrderConfiguration {
                limit_limit_gtc: LimitOrderConfig {
                    base_size: size.to_string(),
                    limit_price: price.to_string(),
                    post_only,
                },
            },
        })
        .map_err(|e| ExchangeError::Permanent { reason: e.to_string() })?;

        let response = self
            .signed_request(reqwest::Method::POST, "/api/v3/brokerage/orders", &body)
            .await?;
        let parsed: PlaceOrderResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::Permanent { reason: e.to_string() })?;

        if !parsed.success {
            return Err(ExchangeError::Permanent {
                reason: parsed.failure_reason.unwrap_or_else(|| "order rejected".into()),
            });
        }
        let order_id = parsed.order_id.ok_or_else(|| ExchangeError::Permanent {
            reason: "missing order_id in successful response".into(),
        })?;
        Ok(OrderId(order_id))
    }

    async fn cancel_order(&self, order_id: &OrderId) -> Result<CancelOutcome, ExchangeError> {
        #[derive(serde::Serialize)]
        struct CancelRequest<'a> {
            order_ids: [&'a str; 1],
        }
        #[derive(Deserialize)]
        struct CancelResultEntry {
            success: bool,
        }
        #[derive(Deserialize)]
        struct CancelResponse {
            results: Vec<CancelResultEntry>,
        }

        let body = serde_json::to_string(&CancelRequest {
            order_ids: [order_id.0.as_str()],
        })
        .map_err(|e| ExchangeError::Permanent { reason: e.to_string() })?;
        let response = self
            .signed_request(reqwest::Method::POST, "/api/v3/brokerage/orders/batch_cancel", &body)
            .await?;
        let parsed: CancelResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::Permanent { reason: e.to_string() })?;
        match parsed.results.first() {
            Some(r) if r.success => Ok(CancelOutcome::Ok),
            _ => Ok(CancelOutcome::NotFound),
        }
    }

    async fn list_open_orders(&self, market_id: Option<&MarketId>) -> Result<Vec<Order>, ExchangeError> {
        #[derive(Deserialize)]
        struct OrderEntry {
            order_id: String,
            client_order_id: String,
            product_id: String,
            side: String,
            status: String,
        }
        #[derive(Deserialize)]
        struct ListOrdersResponse {
            orders: Vec<OrderEntry>,
        }

        let mut path = "/api/v3/brokerage/orders/historical/batch?order_status=OPEN".to_string();
        if let Some(m) = market_id {
            path.push_str(&format!("&product_id={m}"));
        }
        let response = self.signed_request(reqwest::Method::GET, &path, "").await?;
        let parsed: ListOrdersResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::Permanent { reason: e.to_string() })?;

        Ok(parsed
            .orders
            .into_iter()
            .map(|o| Order {
                id: OrderId(o.order_id),
                client_tag: ClientTag(o.client_order_id),
                market_id: MarketId::from(o.product_id),
                side: if o.side == "BUY" { Side::Buy } else { Side::Sell },
                price: Decimal::ZERO, // Coinbase's batch listing omits price for some order types; refreshed by get_order when needed
                size: Decimal::ZERO,
                status: if o.status == "OPEN" { OrderStatus::Open } else { OrderStatus::Unknown },
                created_at: Utc::now(),
                lot_id: None,
            })
            .collect())
    }

    async fn get_fills(&self, since: DateTime<Utc>) -> Result<Vec<Fill>, ExchangeError> {
        #[derive(Deserialize)]
        struct FillEntry {
            entry_id: String,
            order_id: String,
            product_id: String,
            side: String,
            price: Decimal,
            size: Decimal,
            commission: Decimal,
            trade_time: DateTime<Utc>,
        }
        #[derive(Deserialize)]
        struct FillsResponse {
            fills: Vec<FillEntry>,
        }

        let path = format!(
            "/api/v3/brokerage/orders/historical/fills?start_sequence_timestamp={}",
            since.to_rfc3339()
        );
        let response = self.signed_request(reqwest::Method::GET, &path, "").await?;
        let parsed: FillsResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::Permanent { reason: e.to_string() })?;

        Ok(parsed
            .fills
            .into_iter()
            .map(|f| Fill {
                id: f.entry_id,
                order_id: OrderId(f.order_id),
                market_id: MarketId::from(f.product_id),
                side: if f.side == "BUY" { Side::Buy } else { Side::Sell },
                price: f.price,
                size: f.size,
                fee: f.commission,
                timestamp: f.trade_time,
            })
            .collect())
    }

    fn is_paper(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "coinbase"
    }
}

/// Streams level-1 ticker updates over Coinbase's public WebSocket feed.
/// Kept separate from the `ExchangeAdapter` trait since it's an
/// adapter-internal background task, not a request/response call —
/// `grid-bins` spawns this alongside the Engine and feeds updates into
/// the `tokio::sync::watch` cell the tick loop reads from.
pub async fn stream_ticker(
    market_id: MarketId,
    on_update: tokio::sync::mpsc::Sender<(Decimal, DateTime<Utc>)>,
) {
    use futures_util::{SinkExt, StreamExt};

    #[derive(Deserialize)]
    struct TickerEvent {
        price: Decimal,
    }
    #[derive(Deserialize)]
    struct TickerMessage {
        events: Vec<TickerEventWrapper>,
    }
    #[derive(Deserialize)]
    struct TickerEventWrapper {
        tickers: Vec<TickerEvent>,
    }

    let url = "wss://advanced-trade-ws.coinbase.com";
    let subscribe = serde_json::json!({
        "type": "subscribe",
        "product_ids": [market_id.0],
        "channel": "ticker",
    });

    loop {
        let (mut socket, _) = match tokio_tungstenite::connect_async(url).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "ticker stream connect failed, retrying");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };
        if socket
            .send(tokio_tungstenite::tungstenite::Message::Text(subscribe.to_string()))
            .await
            .is_err()
        {
            continue;
        }
        while let Some(Ok(msg)) = socket.next().await {
            if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                if let Ok(parsed) = serde_json::from_str::<TickerMessage>(&text) {
                    for event in parsed.events {
                        for ticker in event.tickers {
                            debug!(price = %ticker.price, "ticker update");
                            let _ = on_update.send((ticker.price, Utc::now())).await;
                        }
                    }
                }
            }
        }
        warn!("ticker stream disconnected, reconnecting");
    }
}
