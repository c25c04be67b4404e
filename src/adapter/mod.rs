//! Exchange adapters
//!
//! [`ExchangeAdapter`] is the pluggable interface to an exchange. Every
//! variant implements the full capability set: the Alpaca client for paper
//! and live runs, the in-process simulator for backtests, and a mock for
//! tests. Adapter I/O is async end to end; a blocking SDK must be wrapped
//! in `spawn_blocking` so it cannot stall the shared executor.

pub mod alpaca;
pub mod loader;
pub mod mock;
pub mod registry;

pub use alpaca::{AlpacaAdapter, AlpacaCredentials};
pub use loader::{AdapterContext, AdapterLoader};
pub use mock::MockExchange;
pub use registry::AdapterRegistry;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::clock::Timeframe;
use crate::market::{Bar, MarketEvent};
use crate::orders::{Fill, OrderIntent, OrderStatus};

/// Push channel for streamed market data.
pub type MarketStream = tokio::sync::mpsc::Receiver<MarketEvent>;

/// Exchange acknowledgement of a submitted order.
///
/// Simulated exchanges may report fills directly in the ack; live exchanges
/// ack first and fill later through polling or streams.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub exchange_order_id: String,
    pub status: OrderStatus,
    pub fills: Vec<Fill>,
}

/// Exchange-side view of an order, used for reconciliation.
#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub exchange_order_id: String,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub fills: Vec<Fill>,
}

#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub account_id: String,
    pub currency: String,
    pub cash: Decimal,
    pub equity: Decimal,
    pub buying_power: Decimal,
}

#[derive(Debug, Clone)]
pub struct PositionSnapshot {
    pub symbol: String,
    /// Signed: negative is short.
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Exchange trading-session clock.
#[derive(Debug, Clone)]
pub struct MarketClock {
    pub ts: DateTime<Utc>,
    pub is_open: bool,
    pub next_open: DateTime<Utc>,
    pub next_close: DateTime<Utc>,
}

/// One trading day in the exchange calendar.
#[derive(Debug, Clone)]
pub struct MarketDay {
    pub date: NaiveDate,
    pub open: NaiveTime,
    pub close: NaiveTime,
}

#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    /// Connection failure or reset. Retried with backoff.
    #[error("exchange connection error: {0}")]
    Connection(String),

    /// Request timed out with unknown outcome. Retried with backoff.
    #[error("exchange request timed out: {0}")]
    Timeout(String),

    /// Durable rejection (insufficient funds, unknown symbol). Never
    /// retried; surfaced as `orders.Rejected`.
    #[error("order rejected by exchange: {0}")]
    Rejected(String),

    #[error("unknown exchange order: {0}")]
    NotFound(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("operation not supported by this adapter: {0}")]
    Unsupported(&'static str),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl AdapterError {
    /// Whether a retry with backoff is worthwhile.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Connection(_) | AdapterError::Timeout(_))
    }
}

/// Pluggable interface to an exchange (live) or simulator (backtest).
#[async_trait]
pub trait ExchangeAdapter: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<(), AdapterError>;
    async fn disconnect(&self) -> Result<(), AdapterError>;
    async fn is_connected(&self) -> bool;

    async fn submit(&self, intent: &OrderIntent) -> Result<OrderAck, AdapterError>;
    async fn cancel(&self, exchange_order_id: &str) -> Result<(), AdapterError>;
    async fn get_order(&self, exchange_order_id: &str) -> Result<OrderSnapshot, AdapterError>;

    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, AdapterError>;

    async fn get_account(&self) -> Result<AccountSnapshot, AdapterError>;
    async fn get_positions(&self) -> Result<Vec<PositionSnapshot>, AdapterError>;

    async fn stream_trades(&self, symbols: &[String]) -> Result<MarketStream, AdapterError>;
    async fn stream_quotes(&self, symbols: &[String]) -> Result<MarketStream, AdapterError>;
    async fn stream_bars(&self, symbols: &[String]) -> Result<MarketStream, AdapterError>;

    async fn get_clock(&self) -> Result<MarketClock, AdapterError>;
    async fn get_calendar(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MarketDay>, AdapterError>;
}
