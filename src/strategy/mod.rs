//! Strategies - mode-agnostic trading logic
//!
//! A strategy never knows whether it is running live, on paper, or inside a
//! backtest: it receives ticks and data windows, and returns actions. The
//! runner translates actions into `strategy.*` envelopes and the domain
//! router rewrites those into mode-specific commands.

pub mod builtin;
pub mod loader;
pub mod runner;

pub use loader::{LoaderError, PluginMetadata, StrategyContext, StrategyLoader};
pub use runner::StrategyRunner;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::clock::ClockTick;
use crate::market::Bar;
use crate::orders::{OrderType, Side, TimeInForce};

/// Bars delivered in response to a window fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct DataWindow {
    pub symbol: String,
    pub end_ts: DateTime<Utc>,
    pub bars: Vec<Bar>,
}

/// An order request as a strategy states it. The runner stamps the run id
/// to form a full [`crate::orders::OrderIntent`].
///
/// `client_order_id` is the strategy's idempotency key; deriving it from
/// the tick index makes redelivered ticks collapse into one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<TimeInForce>,
}

impl OrderRequest {
    pub fn market(client_order_id: &str, symbol: &str, side: Side, quantity: Decimal) -> Self {
        Self {
            client_order_id: client_order_id.to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            stop_price: None,
            time_in_force: None,
        }
    }
}

/// Everything a strategy may ask of the system. A closed sum: the router
/// and runner dispatch exhaustively, so a new action variant is a compile
/// error until every consumer handles it.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyAction {
    /// Request `lookback` bars of history for `symbol`.
    FetchWindow { symbol: String, lookback: u32 },
    /// Place an order.
    PlaceOrder(OrderRequest),
}

#[async_trait]
pub trait Strategy: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &str;

    /// Called at every bar boundary.
    async fn on_tick(&mut self, tick: &ClockTick) -> anyhow::Result<Vec<StrategyAction>>;

    /// Called when a requested window arrives.
    async fn on_data(&mut self, window: &DataWindow) -> anyhow::Result<Vec<StrategyAction>>;
}
