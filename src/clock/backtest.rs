//! Fast-forward clock for backtests
//!
//! Emits ticks at successive bar boundaries from just after `start` up to
//! and including `end`, never sleeping. The next tick is not computed until
//! the current handler returns, so a slow strategy naturally throttles the
//! simulation. Given the same window, timeframe and handler behavior the
//! tick sequence is identical on every run.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use super::{Clock, ClockError, ClockOutcome, ClockTick, TickHandler, Timeframe};

pub struct BacktestClock {
    run_id: Uuid,
    timeframe: Timeframe,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    callback_timeout: Duration,
    handler: Mutex<Option<TickHandler>>,
    stop_tx: watch::Sender<bool>,
    /// Simulated position, unix seconds. Starts at `start`.
    current_secs: Mutex<i64>,
}

impl BacktestClock {
    pub fn new(
        run_id: Uuid,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        callback_timeout: Duration,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            run_id,
            timeframe,
            start,
            end,
            callback_timeout,
            handler: Mutex::new(None),
            stop_tx,
            current_secs: Mutex::new(start.timestamp()),
        }
    }

    fn set_current(&self, ts: DateTime<Utc>) {
        *self.current_secs.lock().expect("current time lock") = ts.timestamp();
    }
}

#[async_trait]
impl Clock for BacktestClock {
    fn on_tick(&self, handler: TickHandler) {
        *self.handler.lock().expect("handler lock") = Some(handler);
    }

    async fn run(&self) -> Result<ClockOutcome, ClockError> {
        let handler = self
            .handler
            .lock()
            .expect("handler lock")
            .clone()
            .ok_or(ClockError::NoHandler)?;
        let stop_rx = self.stop_tx.subscribe();

        // First boundary strictly after start: the first completed bar.
        let mut ts = self.timeframe.next_boundary(self.start);
        let mut bar_index = 0u64;

        while ts <= self.end {
            if *stop_rx.borrow() {
                debug!(run_id = %self.run_id, "Backtest clock stopped");
                return Ok(ClockOutcome::Stopped);
            }

            self.set_current(ts);
            let tick = ClockTick {
                run_id: self.run_id,
                ts,
                timeframe: self.timeframe,
                bar_index,
                is_backtest: true,
            };

            // Advance only after the handler returns.
            match tokio::time::timeout(self.callback_timeout, handler(tick)).await {
                Err(_) => {
                    return Err(ClockError::TickTimeout {
                        ts,
                        timeout_secs: self.callback_timeout.as_secs(),
                    })
                }
                Ok(Err(e)) => {
                    return Err(ClockError::Handler {
                        ts,
                        message: e.to_string(),
                    })
                }
                Ok(Ok(())) => {}
            }

            bar_index += 1;
            ts = Utc
                .timestamp_opt(ts.timestamp() + self.timeframe.duration_secs(), 0)
                .single()
                .expect("boundary unix second is valid");
        }

        debug!(run_id = %self.run_id, ticks = bar_index, "Backtest clock completed");
        Ok(ClockOutcome::Completed)
    }

    fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    fn current_time(&self) -> DateTime<Utc> {
        let secs = *self.current_secs.lock().expect("current time lock");
        Utc.timestamp_opt(secs, 0).single().expect("current unix second is valid")
    }
}
