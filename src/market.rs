//! Market data primitives

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::clock::Timeframe;

/// One OHLCV aggregate. Unique by (symbol, timeframe, ts).
///
/// `ts` is the bar start and is always aligned to the timeframe boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub ts: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vwap: Option<Decimal>,
}

impl Bar {
    /// True when `price` lies within the bar's traded range.
    #[inline]
    pub fn crosses(&self, price: Decimal) -> bool {
        price >= self.low && price <= self.high
    }

    /// High minus low.
    #[inline]
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }
}

/// Market data pushed by an adapter stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarketEvent {
    Trade {
        symbol: String,
        ts: DateTime<Utc>,
        price: Decimal,
        size: Decimal,
    },
    Quote {
        symbol: String,
        ts: DateTime<Utc>,
        bid: Decimal,
        ask: Decimal,
        bid_size: Decimal,
        ask_size: Decimal,
    },
    Bar(Bar),
}
