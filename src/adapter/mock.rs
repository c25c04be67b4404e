//! Scriptable in-process exchange for tests
//!
//! Behavior is configured per capability so a test can drive the exact
//! failure it needs: transient submit errors, durable rejections, immediate
//! fills, or a dead market-data path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;

use super::{
    AccountSnapshot, AdapterError, ExchangeAdapter, MarketClock, MarketDay, MarketStream,
    OrderAck, OrderSnapshot, PositionSnapshot,
};
use crate::clock::Timeframe;
use crate::market::Bar;
use crate::orders::{Fill, OrderIntent, OrderStatus};

/// What `submit` should do.
#[derive(Debug, Clone)]
pub enum SubmitBehavior {
    /// Ack as submitted; no fills.
    Accept,
    /// Ack and report one complete fill at `price`.
    AcceptAndFill { price: Decimal },
    /// Durable rejection.
    Reject(String),
    /// Transient failure `times` in a row, then accept.
    FailTransientTimes { times: u32 },
    /// Transient failure on every attempt.
    FailTransientAlways,
}

/// What `get_bars` should do.
#[derive(Debug, Clone)]
pub enum BarsBehavior {
    Return(Vec<Bar>),
    FailTransientAlways,
}

#[derive(Debug)]
pub struct MockExchange {
    connected: AtomicBool,
    fail_connect: AtomicBool,
    submit_behavior: Mutex<SubmitBehavior>,
    bars_behavior: Mutex<BarsBehavior>,
    orders: Mutex<Vec<(String, OrderIntent)>>,
    cancelled: Mutex<Vec<String>>,
    submit_attempts: AtomicU64,
    next_id: AtomicU64,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            fail_connect: AtomicBool::new(false),
            submit_behavior: Mutex::new(SubmitBehavior::Accept),
            bars_behavior: Mutex::new(BarsBehavior::Return(Vec::new())),
            orders: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            submit_attempts: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_submit_behavior(self, behavior: SubmitBehavior) -> Self {
        *self.submit_behavior.lock().expect("behavior lock") = behavior;
        self
    }

    pub fn with_bars_behavior(self, behavior: BarsBehavior) -> Self {
        *self.bars_behavior.lock().expect("behavior lock") = behavior;
        self
    }

    pub fn set_submit_behavior(&self, behavior: SubmitBehavior) {
        *self.submit_behavior.lock().expect("behavior lock") = behavior;
    }

    /// Make every `connect` attempt fail with a connection error.
    pub fn with_connect_failure(self) -> Self {
        self.fail_connect.store(true, Ordering::SeqCst);
        self
    }

    /// Total submit attempts, including failed ones.
    pub fn submit_attempts(&self) -> u64 {
        self.submit_attempts.load(Ordering::SeqCst)
    }

    pub fn cancelled_ids(&self) -> Vec<String> {
        self.cancelled.lock().expect("cancel lock").clone()
    }
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchange {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(AdapterError::Connection("connection refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
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
        let attempt = self.submit_attempts.fetch_add(1, Ordering::SeqCst);

        let behavior = self.submit_behavior.lock().expect("behavior lock").clone();
        match behavior {
            SubmitBehavior::FailTransientAlways => {
                return Err(AdapterError::Connection("connection reset".to_string()))
            }
            SubmitBehavior::FailTransientTimes { times } if attempt < times as u64 => {
                return Err(AdapterError::Timeout("simulated timeout".to_string()))
            }
            SubmitBehavior::Reject(reason) => return Err(AdapterError::Rejected(reason)),
            _ => {}
        }

        let exchange_order_id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.orders
            .lock()
            .expect("order lock")
            .push((exchange_order_id.clone(), intent.clone()));

        // The manager re-keys ack fills onto the order id it owns.
        let fills = match behavior {
            SubmitBehavior::AcceptAndFill { price } => vec![Fill::new(
                uuid::Uuid::nil(),
                intent.quantity,
                price,
                Decimal::ZERO,
                Utc::now(),
            )],
            _ => Vec::new(),
        };

        Ok(OrderAck {
            exchange_order_id,
            status: OrderStatus::Submitted,
            fills,
        })
    }

    async fn cancel(&self, exchange_order_id: &str) -> Result<(), AdapterError> {
        self.cancelled
            .lock()
            .expect("cancel lock")
            .push(exchange_order_id.to_string());
        Ok(())
    }

    async fn get_order(&self, exchange_order_id: &str) -> Result<OrderSnapshot, AdapterError> {
        let orders = self.orders.lock().expect("order lock");
        orders
            .iter()
            .find(|(id, _)| id == exchange_order_id)
            .ok_or_else(|| AdapterError::NotFound(exchange_order_id.to_string()))?;
        Ok(OrderSnapshot {
            exchange_order_id: exchange_order_id.to_string(),
            status: OrderStatus::Submitted,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            fills: Vec::new(),
        })
    }

    async fn get_bars(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, AdapterError> {
        match self.bars_behavior.lock().expect("behavior lock").clone() {
            BarsBehavior::Return(bars) => Ok(bars),
            BarsBehavior::FailTransientAlways => {
                Err(AdapterError::Connection("market data unavailable".to_string()))
            }
        }
    }

    async fn get_account(&self) -> Result<AccountSnapshot, AdapterError> {
        Ok(AccountSnapshot {
            account_id: "mock-account".to_string(),
            currency: "USD".to_string(),
            cash: Decimal::new(100_000, 0),
            equity: Decimal::new(100_000, 0),
            buying_power: Decimal::new(200_000, 0),
        })
    }

    async fn get_positions(&self) -> Result<Vec<PositionSnapshot>, AdapterError> {
        Ok(Vec::new())
    }

    async fn stream_trades(&self, _symbols: &[String]) -> Result<MarketStream, AdapterError> {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        Ok(rx)
    }

    async fn stream_quotes(&self, _symbols: &[String]) -> Result<MarketStream, AdapterError> {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        Ok(rx)
    }

    async fn stream_bars(&self, _symbols: &[String]) -> Result<MarketStream, AdapterError> {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        Ok(rx)
    }

    async fn get_clock(&self) -> Result<MarketClock, AdapterError> {
        let now = Utc::now();
        Ok(MarketClock {
            ts: now,
            is_open: true,
            next_open: now,
            next_close: now,
        })
    }

    async fn get_calendar(
        &self,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<MarketDay>, AdapterError> {
        Ok(vec![MarketDay {
            date: Utc::now().date_naive(),
            open: NaiveTime::from_hms_opt(9, 30, 0).expect("valid time"),
            close: NaiveTime::from_hms_opt(16, 0, 0).expect("valid time"),
        }])
    }
}
