//! Clocks - the system's notion of time
//!
//! One interface, two variants: [`RealtimeClock`] sleeps to wall-clock bar
//! boundaries, [`BacktestClock`] fast-forwards through a historical window
//! without sleeping. Either way a tick's `ts` is the exact bar boundary,
//! never the wake-up time, and the per-tick handler runs under a bounded
//! timeout.

pub mod backtest;
pub mod realtime;
pub mod timeframe;

pub use backtest::BacktestClock;
pub use realtime::RealtimeClock;
pub use timeframe::Timeframe;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

/// One tick, handed to the registered handler at each bar boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockTick {
    pub run_id: Uuid,
    /// The bar boundary this tick represents.
    pub ts: DateTime<Utc>,
    pub timeframe: Timeframe,
    /// Zero-based tick counter within the run.
    pub bar_index: u64,
    /// Hint only. Strategies must not branch on it.
    pub is_backtest: bool,
}

/// Per-tick callback. The clock awaits it before advancing (cooperative
/// backpressure in backtests) and aborts it past the configured timeout.
pub type TickHandler = Arc<dyn Fn(ClockTick) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// How an emission loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOutcome {
    /// A backtest clock reached its end boundary.
    Completed,
    /// `stop()` was requested.
    Stopped,
}

#[derive(Error, Debug)]
pub enum ClockError {
    #[error("no tick handler registered")]
    NoHandler,

    /// The handler exceeded the per-tick timeout. Surfaced as a run error.
    #[error("tick handler timed out after {timeout_secs}s at {ts}")]
    TickTimeout { ts: DateTime<Utc>, timeout_secs: u64 },

    /// The handler returned an error. Surfaced as a run error.
    #[error("tick handler failed at {ts}: {message}")]
    Handler { ts: DateTime<Utc>, message: String },
}

/// Drives tick emission for one run.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Register the per-tick callback. Must be called before [`Clock::run`].
    fn on_tick(&self, handler: TickHandler);

    /// Run the emission loop. Returns when the historical window is
    /// exhausted (backtest), or when stopped.
    async fn run(&self) -> Result<ClockOutcome, ClockError>;

    /// Request the loop to stop. Idempotent; cancels any pending emission.
    fn stop(&self);

    /// The active notion of time: wall clock, or the simulated position.
    fn current_time(&self) -> DateTime<Utc>;
}
