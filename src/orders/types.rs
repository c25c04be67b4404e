//! Order domain types
//!
//! An [`OrderIntent`] is what a strategy asks for; an [`OrderState`] is the
//! durable lifecycle record the manager owns. Fills are persisted separately
//! so execution history survives restart.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::OrderError;
use super::state::OrderStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum Side {
    Buy = 1,
    Sell = 2,
}

impl Side {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Side::Buy),
            2 => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    /// The opposite side.
    #[inline]
    pub fn flip(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for buy, -1 for sell. Used by signed position arithmetic.
    #[inline]
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum OrderType {
    Market = 1,
    Limit = 2,
    Stop = 3,
    StopLimit = 4,
}

impl OrderType {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(OrderType::Market),
            2 => Some(OrderType::Limit),
            3 => Some(OrderType::Stop),
            4 => Some(OrderType::StopLimit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
            OrderType::StopLimit => "stop_limit",
        }
    }

    /// Whether this type requires a limit price.
    #[inline]
    pub fn needs_limit_price(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::StopLimit)
    }

    /// Whether this type requires a stop price.
    #[inline]
    pub fn needs_stop_price(&self) -> bool {
        matches!(self, OrderType::Stop | OrderType::StopLimit)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum TimeInForce {
    Day = 1,
    Gtc = 2,
    Ioc = 3,
    Fok = 4,
}

impl TimeInForce {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TimeInForce::Day),
            2 => Some(TimeInForce::Gtc),
            3 => Some(TimeInForce::Ioc),
            4 => Some(TimeInForce::Fok),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Day => "day",
            TimeInForce::Gtc => "gtc",
            TimeInForce::Ioc => "ioc",
            TimeInForce::Fok => "fok",
        }
    }
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TimeInForce {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(TimeInForce::Day),
            "gtc" => Ok(TimeInForce::Gtc),
            "ioc" => Ok(TimeInForce::Ioc),
            "fok" => Ok(TimeInForce::Fok),
            other => Err(format!("unknown time in force: {other}")),
        }
    }
}

/// What a strategy asks for.
///
/// `client_order_id` is the caller-supplied idempotency key, unique per run;
/// resubmitting the same key returns the existing order instead of placing a
/// duplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub client_order_id: String,
    pub run_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    /// When absent the system-wide configured default applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<TimeInForce>,
}

impl OrderIntent {
    /// Validate the intent shape. Called at the manager boundary before any
    /// state is persisted.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.client_order_id.is_empty() {
            return Err(OrderError::Validation(
                "client_order_id must not be empty".to_string(),
            ));
        }
        if self.symbol.is_empty() {
            return Err(OrderError::Validation("symbol must not be empty".to_string()));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(OrderError::Validation(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        if self.order_type.needs_limit_price() && self.limit_price.is_none() {
            return Err(OrderError::Validation(format!(
                "{} orders require limit_price",
                self.order_type
            )));
        }
        if self.order_type.needs_stop_price() && self.stop_price.is_none() {
            return Err(OrderError::Validation(format!(
                "{} orders require stop_price",
                self.order_type
            )));
        }
        Ok(())
    }
}

/// Maker/taker flag on a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum Liquidity {
    Maker = 1,
    Taker = 2,
}

impl Liquidity {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Liquidity::Maker),
            2 => Some(Liquidity::Taker),
            _ => None,
        }
    }
}

/// One execution against an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: String,
    pub order_id: Uuid,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liquidity: Option<Liquidity>,
}

impl Fill {
    pub fn new(order_id: Uuid, quantity: Decimal, price: Decimal, fee: Decimal, ts: DateTime<Utc>) -> Self {
        Self {
            fill_id: ulid::Ulid::new().to_string(),
            order_id,
            quantity,
            price,
            fee,
            ts,
            liquidity: None,
        }
    }

    pub fn with_liquidity(mut self, liquidity: Liquidity) -> Self {
        self.liquidity = Some(liquidity);
        self
    }
}

/// Durable order lifecycle record.
///
/// Owned by the OrderManager: all mutations flow through it, serialized per
/// order id. The fills list is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderState {
    pub id: Uuid,
    pub run_id: Uuid,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub status: OrderStatus,
    pub exchange_order_id: Option<String>,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub reject_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fills: Vec<Fill>,
}

impl OrderState {
    /// Build a fresh record from an intent, in SUBMITTING state.
    pub fn from_intent(intent: &OrderIntent, default_tif: TimeInForce) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: intent.run_id,
            client_order_id: intent.client_order_id.clone(),
            symbol: intent.symbol.clone(),
            side: intent.side,
            order_type: intent.order_type,
            quantity: intent.quantity,
            limit_price: intent.limit_price,
            stop_price: intent.stop_price,
            time_in_force: intent.time_in_force.unwrap_or(default_tif),
            status: OrderStatus::Submitting,
            exchange_order_id: None,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            reject_reason: None,
            created_at: Utc::now(),
            submitted_at: None,
            closed_at: None,
            fills: Vec::new(),
        }
    }

    /// Remaining unfilled quantity.
    #[inline]
    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    /// Transition to `next`, stamping lifecycle timestamps.
    ///
    /// # Errors
    /// Returns [`OrderError::IllegalTransition`] when the edge is not legal.
    pub fn transition(&mut self, next: OrderStatus) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::IllegalTransition {
                order_id: self.id,
                from: self.status,
                to: next,
            });
        }
        if next == OrderStatus::Submitted {
            self.submitted_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.closed_at = Some(Utc::now());
        }
        self.status = next;
        Ok(())
    }

    /// Apply one fill: append, update cumulative quantity and average price,
    /// and advance the status. Returns the resulting status.
    ///
    /// # Errors
    /// Rejects fills on terminal orders and fills that would exceed the
    /// order quantity.
    pub fn apply_fill(&mut self, fill: Fill) -> Result<OrderStatus, OrderError> {
        if self.status.is_terminal() {
            return Err(OrderError::IllegalTransition {
                order_id: self.id,
                from: self.status,
                to: OrderStatus::Partial,
            });
        }
        let new_filled = self.filled_quantity + fill.quantity;
        if new_filled > self.quantity {
            return Err(OrderError::Overfill {
                order_id: self.id,
                filled: new_filled,
                quantity: self.quantity,
            });
        }

        // Volume-weighted average across all fills.
        let prior_notional = self
            .avg_fill_price
            .map(|p| p * self.filled_quantity)
            .unwrap_or(Decimal::ZERO);
        let notional = prior_notional + fill.price * fill.quantity;
        self.avg_fill_price = Some(notional / new_filled);
        self.filled_quantity = new_filled;
        self.fills.push(fill);

        let next = if self.filled_quantity == self.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };
        self.transition(next)?;
        Ok(next)
    }
}
