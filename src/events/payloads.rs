//! Typed event payloads
//!
//! One struct per payload shape. Several event types share a shape (every
//! `orders.*` event carries an [`OrderEventPayload`]); the registry binds
//! each type string to the shape it must deserialize into.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Timeframe;
use crate::market::Bar;
use crate::orders::{Fill, Liquidity, OrderState, OrderStatus, Side};
use crate::runs::{Run, RunMode, RunStatus};

/// A payload with a canonical event type.
///
/// Shapes shared by several types (window fetches, order intents) are
/// emitted through [`crate::events::Envelope::caused`] with an explicit type
/// string instead.
pub trait EventPayload: Serialize + DeserializeOwned {
    const EVENT_TYPE: &'static str;
}

/// Payload of `clock.Tick`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockTickPayload {
    /// Bar boundary the tick represents, never the wall wake-up time.
    pub ts: DateTime<Utc>,
    pub timeframe: Timeframe,
    /// Zero-based index of this tick within its run.
    pub bar_index: u64,
    /// Hint only. Strategies must not branch on it.
    pub is_backtest: bool,
}

impl EventPayload for ClockTickPayload {
    const EVENT_TYPE: &'static str = super::event_types::CLOCK_TICK;
}

/// Payload of `strategy.FetchWindow`, `live.FetchWindow` and
/// `backtest.FetchWindow`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchWindowPayload {
    pub symbol: String,
    /// Number of bars requested, counting back from `end_ts`.
    pub lookback: u32,
    /// Window end. Absent means "up to the run's current time".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<DateTime<Utc>>,
}

/// Payload of `data.WindowReady`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataWindowPayload {
    pub symbol: String,
    pub end_ts: DateTime<Utc>,
    pub bars: Vec<Bar>,
}

impl EventPayload for DataWindowPayload {
    const EVENT_TYPE: &'static str = super::event_types::DATA_WINDOW_READY;
}

/// Payload of `data.WindowChunk`. Large windows are split into chunks so a
/// single frame stays bounded; `last` marks the final chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowChunkPayload {
    pub symbol: String,
    pub chunk_index: u32,
    pub last: bool,
    pub bars: Vec<Bar>,
}

impl EventPayload for WindowChunkPayload {
    const EVENT_TYPE: &'static str = super::event_types::DATA_WINDOW_CHUNK;
}

/// Fill details attached to `orders.Filled` / `orders.PartiallyFilled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillDetail {
    pub fill_id: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liquidity: Option<Liquidity>,
}

impl From<&Fill> for FillDetail {
    fn from(fill: &Fill) -> Self {
        Self {
            fill_id: fill.fill_id.clone(),
            quantity: fill.quantity,
            price: fill.price,
            fee: fill.fee,
            ts: fill.ts,
            liquidity: fill.liquidity,
        }
    }
}

/// Payload shared by every `orders.*` event: identifiers and status, plus
/// the triggering fill where one exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEventPayload {
    pub order_id: Uuid,
    pub run_id: Uuid,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub status: OrderStatus,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_fill_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<FillDetail>,
}

impl OrderEventPayload {
    pub fn from_order(order: &OrderState) -> Self {
        Self {
            order_id: order.id,
            run_id: order.run_id,
            client_order_id: order.client_order_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            status: order.status,
            quantity: order.quantity,
            filled_quantity: order.filled_quantity,
            avg_fill_price: order.avg_fill_price,
            exchange_order_id: order.exchange_order_id.clone(),
            reject_reason: order.reject_reason.clone(),
            fill: None,
        }
    }

    pub fn with_fill(mut self, fill: &Fill) -> Self {
        self.fill = Some(FillDetail::from(fill));
        self
    }
}

/// Aggregate statistics reported with `run.Completed`.
///
/// `sharpe`, `sortino` and `max_drawdown` are reserved and reported as zero
/// until their computation lands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunStatsPayload {
    pub total_return: Decimal,
    pub annualized_return: Decimal,
    pub win_rate: Decimal,
    pub profit_factor: Decimal,
    pub sharpe: Decimal,
    pub sortino: Decimal,
    pub max_drawdown: Decimal,
    pub trade_count: u64,
}

/// Payload shared by every `run.*` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEventPayload {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub strategy_id: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<RunStatsPayload>,
}

impl RunEventPayload {
    pub fn from_run(run: &Run) -> Self {
        Self {
            run_id: run.id,
            mode: run.mode,
            strategy_id: run.strategy_id.clone(),
            status: run.status,
            error_message: run.error_message.clone(),
            stats: None,
        }
    }

    pub fn with_stats(mut self, stats: RunStatsPayload) -> Self {
        self.stats = Some(stats);
        self
    }
}
