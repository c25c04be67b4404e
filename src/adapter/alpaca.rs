//! Alpaca exchange adapter
//!
//! REST client over the Alpaca trading and market data APIs. A distinct
//! credential set exists per mode, so a live run and a paper run can trade
//! concurrently in one process through two adapter instances. Requests are
//! async end to end; nothing here blocks the executor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    AccountSnapshot, AdapterError, ExchangeAdapter, MarketClock, MarketDay, MarketStream,
    OrderAck, OrderSnapshot, PositionSnapshot,
};
use crate::clock::Timeframe;
use crate::market::{Bar, MarketEvent};
use crate::orders::{OrderIntent, OrderStatus, OrderType, TimeInForce};

const KEY_HEADER: &str = "APCA-API-KEY-ID";
const SECRET_HEADER: &str = "APCA-API-SECRET-KEY";
const DATA_BASE_URL: &str = "https://data.alpaca.markets";

/// One credential set. Secrets come from the environment, never from files
/// checked into the tree.
#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaCredentials {
    pub api_key: String,
    pub api_secret: String,
    /// Trading API base, e.g. `https://paper-api.alpaca.markets`.
    pub base_url: String,
}

#[derive(Debug)]
pub struct AlpacaAdapter {
    name: String,
    creds: AlpacaCredentials,
    http: reqwest::Client,
    connected: AtomicBool,
}

impl AlpacaAdapter {
    pub fn new(name: &str, creds: AlpacaCredentials) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client construction is infallible");
        Self {
            name: name.to_string(),
            creds,
            http,
            connected: AtomicBool::new(false),
        }
    }

    fn trading_url(&self, path: &str) -> String {
        format!("{}{}", self.creds.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header(KEY_HEADER, &self.creds.api_key)
            .header(SECRET_HEADER, &self.creds.api_secret)
    }

    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, AdapterError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 | 403 => AdapterError::Auth(body),
            404 => AdapterError::NotFound(body),
            // 422 carries business rejections (insufficient buying power,
            // unknown symbol); 429 and 5xx are worth retrying.
            422 => AdapterError::Rejected(body),
            429 | 500..=599 => AdapterError::Connection(format!("{status}: {body}")),
            _ => AdapterError::Protocol(format!("{status}: {body}")),
        })
    }

    fn map_send_error(e: reqwest::Error) -> AdapterError {
        if e.is_timeout() {
            AdapterError::Timeout(e.to_string())
        } else {
            AdapterError::Connection(e.to_string())
        }
    }

    fn alpaca_timeframe(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::M1 => "1Min",
            Timeframe::M5 => "5Min",
            Timeframe::M15 => "15Min",
            Timeframe::M30 => "30Min",
            Timeframe::H1 => "1Hour",
            Timeframe::H4 => "4Hour",
            Timeframe::D1 => "1Day",
        }
    }

    fn map_status(status: &str) -> OrderStatus {
        match status {
            "new" | "pending_new" | "accepted" => OrderStatus::Accepted,
            "partially_filled" => OrderStatus::Partial,
            "filled" => OrderStatus::Filled,
            "canceled" | "pending_cancel" | "stopped" => OrderStatus::Cancelled,
            "rejected" => OrderStatus::Rejected,
            "expired" | "done_for_day" => OrderStatus::Expired,
            _ => OrderStatus::Submitted,
        }
    }
}

// === Wire shapes ===

#[derive(Debug, Deserialize)]
struct AlpacaOrder {
    id: String,
    status: String,
    #[serde(default)]
    filled_qty: Option<Decimal>,
    #[serde(default)]
    filled_avg_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct AlpacaAccount {
    id: String,
    currency: String,
    cash: Decimal,
    equity: Decimal,
    buying_power: Decimal,
}

#[derive(Debug, Deserialize)]
struct AlpacaPosition {
    symbol: String,
    qty: Decimal,
    avg_entry_price: Decimal,
    #[serde(default)]
    unrealized_pl: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct AlpacaBar {
    t: DateTime<Utc>,
    o: Decimal,
    h: Decimal,
    l: Decimal,
    c: Decimal,
    v: Decimal,
    #[serde(default)]
    n: Option<i64>,
    #[serde(default)]
    vw: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct AlpacaBarsPage {
    #[serde(default)]
    bars: Vec<AlpacaBar>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaClock {
    timestamp: DateTime<Utc>,
    is_open: bool,
    next_open: DateTime<Utc>,
    next_close: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct AlpacaCalendarDay {
    date: NaiveDate,
    open: NaiveTime,
    close: NaiveTime,
}

#[async_trait]
impl ExchangeAdapter for AlpacaAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        // Credential probe; Alpaca has no session to open.
        self.get_account().await?;
        self.connected.store(true, Ordering::SeqCst);
        debug!(adapter = %self.name, "Alpaca adapter connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn submit(&self, intent: &OrderIntent) -> Result<OrderAck, AdapterError> {
        let mut body = serde_json::json!({
            "symbol": intent.symbol,
            "qty": intent.quantity.to_string(),
            "side": intent.side.as_str(),
            "type": match intent.order_type {
                OrderType::Market => "market",
                OrderType::Limit => "limit",
                OrderType::Stop => "stop",
                OrderType::StopLimit => "stop_limit",
            },
            "time_in_force": intent.time_in_force.unwrap_or(TimeInForce::Day).as_str(),
            "client_order_id": intent.client_order_id,
        });
        if let Some(limit) = intent.limit_price {
            body["limit_price"] = serde_json::Value::String(limit.to_string());
        }
        if let Some(stop) = intent.stop_price {
            body["stop_price"] = serde_json::Value::String(stop.to_string());
        }

        let response = self
            .authed(self.http.post(self.trading_url("/v2/orders")))
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let order: AlpacaOrder = Self::check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Protocol(e.to_string()))?;

        Ok(OrderAck {
            exchange_order_id: order.id,
            status: Self::map_status(&order.status),
            fills: Vec::new(),
        })
    }

    async fn cancel(&self, exchange_order_id: &str) -> Result<(), AdapterError> {
        let response = self
            .authed(
                self.http
                    .delete(self.trading_url(&format!("/v2/orders/{exchange_order_id}"))),
            )
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check_response(response).await?;
        Ok(())
    }

    async fn get_order(&self, exchange_order_id: &str) -> Result<OrderSnapshot, AdapterError> {
        let response = self
            .authed(
                self.http
                    .get(self.trading_url(&format!("/v2/orders/{exchange_order_id}"))),
            )
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let order: AlpacaOrder = Self::check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Protocol(e.to_string()))?;

        Ok(OrderSnapshot {
            exchange_order_id: order.id,
            status: Self::map_status(&order.status),
            filled_quantity: order.filled_qty.unwrap_or(Decimal::ZERO),
            avg_fill_price: order.filled_avg_price,
            fills: Vec::new(),
        })
    }

    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, AdapterError> {
        let mut bars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(format!("{DATA_BASE_URL}/v2/stocks/{symbol}/bars"))
                .query(&[
                    ("timeframe", Self::alpaca_timeframe(timeframe).to_string()),
                    ("start", start.to_rfc3339()),
                    ("end", end.to_rfc3339()),
                    ("limit", "10000".to_string()),
                ]);
            if let Some(token) = &page_token {
                request = request.query(&[("page_token", token.clone())]);
            }

            let response = self
                .authed(request)
                .send()
                .await
                .map_err(Self::map_send_error)?;
            let page: AlpacaBarsPage = Self::check_response(response)
                .await?
                .json()
                .await
                .map_err(|e| AdapterError::Protocol(e.to_string()))?;

            bars.extend(page.bars.into_iter().map(|b| Bar {
                symbol: symbol.to_string(),
                timeframe,
                ts: b.t,
                open: b.o,
                high: b.h,
                low: b.l,
                close: b.c,
                volume: b.v,
                trade_count: b.n,
                vwap: b.vw,
            }));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(bars)
    }

    async fn get_account(&self) -> Result<AccountSnapshot, AdapterError> {
        let response = self
            .authed(self.http.get(self.trading_url("/v2/account")))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let account: AlpacaAccount = Self::check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Protocol(e.to_string()))?;

        Ok(AccountSnapshot {
            account_id: account.id,
            currency: account.currency,
            cash: account.cash,
            equity: account.equity,
            buying_power: account.buying_power,
        })
    }

    async fn get_positions(&self) -> Result<Vec<PositionSnapshot>, AdapterError> {
        let response = self
            .authed(self.http.get(self.trading_url("/v2/positions")))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let positions: Vec<AlpacaPosition> = Self::check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Protocol(e.to_string()))?;

        Ok(positions
            .into_iter()
            .map(|p| PositionSnapshot {
                symbol: p.symbol,
                quantity: p.qty,
                avg_entry_price: p.avg_entry_price,
                unrealized_pnl: p.unrealized_pl.unwrap_or(Decimal::ZERO),
            })
            .collect())
    }

    async fn stream_trades(&self, _symbols: &[String]) -> Result<MarketStream, AdapterError> {
        Err(AdapterError::Unsupported("stream_trades"))
    }

    async fn stream_quotes(&self, _symbols: &[String]) -> Result<MarketStream, AdapterError> {
        Err(AdapterError::Unsupported("stream_quotes"))
    }

    /// Bars are streamed by polling the REST endpoint once per minute; the
    /// websocket feed is a transport-layer concern.
    async fn stream_bars(&self, symbols: &[String]) -> Result<MarketStream, AdapterError> {
        let (tx, rx) = tokio::sync::mpsc::channel(256);
        let symbols = symbols.to_vec();
        let adapter = AlpacaAdapter::new(&self.name, self.creds.clone());

        tokio::spawn(async move {
            let mut last_seen: Option<DateTime<Utc>> = None;
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                let end = Utc::now();
                let start = end - chrono::Duration::minutes(5);
                for symbol in &symbols {
                    match adapter.get_bars(symbol, Timeframe::M1, start, end).await {
                        Ok(bars) => {
                            for bar in bars {
                                if last_seen.map_or(true, |seen| bar.ts > seen) {
                                    last_seen = Some(bar.ts);
                                    if tx.send(MarketEvent::Bar(bar)).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                        Err(e) => warn!(symbol = %symbol, error = %e, "Bar poll failed"),
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn get_clock(&self) -> Result<MarketClock, AdapterError> {
        let response = self
            .authed(self.http.get(self.trading_url("/v2/clock")))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let clock: AlpacaClock = Self::check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Protocol(e.to_string()))?;

        Ok(MarketClock {
            ts: clock.timestamp,
            is_open: clock.is_open,
            next_open: clock.next_open,
            next_close: clock.next_close,
        })
    }

    async fn get_calendar(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MarketDay>, AdapterError> {
        let response = self
            .authed(self.http.get(self.trading_url("/v2/calendar")))
            .query(&[("start", start.to_string()), ("end", end.to_string())])
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let days: Vec<AlpacaCalendarDay> = Self::check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Protocol(e.to_string()))?;

        Ok(days
            .into_iter()
            .map(|d| MarketDay {
                date: d.date,
                open: d.open,
                close: d.close,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AlpacaAdapter::map_status("new"), OrderStatus::Accepted);
        assert_eq!(
            AlpacaAdapter::map_status("partially_filled"),
            OrderStatus::Partial
        );
        assert_eq!(AlpacaAdapter::map_status("filled"), OrderStatus::Filled);
        assert_eq!(AlpacaAdapter::map_status("canceled"), OrderStatus::Cancelled);
        assert_eq!(AlpacaAdapter::map_status("rejected"), OrderStatus::Rejected);
        assert_eq!(AlpacaAdapter::map_status("expired"), OrderStatus::Expired);
    }

    #[test]
    fn test_timeframe_mapping() {
        assert_eq!(AlpacaAdapter::alpaca_timeframe(Timeframe::M1), "1Min");
        assert_eq!(AlpacaAdapter::alpaca_timeframe(Timeframe::H1), "1Hour");
        assert_eq!(AlpacaAdapter::alpaca_timeframe(Timeframe::D1), "1Day");
    }
}
