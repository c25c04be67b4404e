//! Wall-clock-aligned clock for paper and live runs
//!
//! Computes the next bar boundary, sleeps until it, and emits a tick whose
//! `ts` is the boundary itself, never the actual wake-up time. Target
//! precision is within 50ms of the boundary. On drift beyond one second the
//! boundary is skipped and recomputed with a warning. Two ticks never share
//! a `ts` for the same run.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Clock, ClockError, ClockOutcome, ClockTick, TickHandler, Timeframe};

/// Drift beyond this is logged and the boundary recomputed.
const MAX_DRIFT_MS: i64 = 1_000;

pub struct RealtimeClock {
    run_id: Uuid,
    timeframe: Timeframe,
    callback_timeout: Duration,
    handler: Mutex<Option<TickHandler>>,
    stop_tx: watch::Sender<bool>,
    last_emitted: Mutex<Option<DateTime<Utc>>>,
}

impl RealtimeClock {
    pub fn new(run_id: Uuid, timeframe: Timeframe, callback_timeout: Duration) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            run_id,
            timeframe,
            callback_timeout,
            handler: Mutex::new(None),
            stop_tx,
            last_emitted: Mutex::new(None),
        }
    }

    /// The next boundary to emit, skipping one already emitted.
    fn next_target(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut target = self.timeframe.next_boundary(now);
        if *self.last_emitted.lock().expect("last emitted lock") == Some(target) {
            target = self.timeframe.next_boundary(target);
        }
        target
    }
}

#[async_trait]
impl Clock for RealtimeClock {
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
        let mut stop_rx = self.stop_tx.subscribe();
        let mut bar_index = 0u64;

        loop {
            if *stop_rx.borrow() {
                debug!(run_id = %self.run_id, "Realtime clock stopped");
                return Ok(ClockOutcome::Stopped);
            }

            let now = Utc::now();
            let target = self.next_target(now);
            let sleep_for = (target - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        debug!(run_id = %self.run_id, "Realtime clock stopped while waiting");
                        return Ok(ClockOutcome::Stopped);
                    }
                }
            }

            let woke = Utc::now();
            if (woke - target).num_milliseconds() > MAX_DRIFT_MS {
                warn!(
                    run_id = %self.run_id,
                    target = %target,
                    drift_ms = (woke - target).num_milliseconds(),
                    "Clock drift exceeded tolerance; recomputing boundary"
                );
                continue;
            }

            // Emit the boundary, not the wake time.
            let tick = ClockTick {
                run_id: self.run_id,
                ts: target,
                timeframe: self.timeframe,
                bar_index,
                is_backtest: false,
            };

            match tokio::time::timeout(self.callback_timeout, handler(tick)).await {
                Err(_) => {
                    return Err(ClockError::TickTimeout {
                        ts: target,
                        timeout_secs: self.callback_timeout.as_secs(),
                    })
                }
                Ok(Err(e)) => {
                    return Err(ClockError::Handler {
                        ts: target,
                        message: e.to_string(),
                    })
                }
                Ok(Ok(())) => {}
            }

            *self.last_emitted.lock().expect("last emitted lock") = Some(target);
            bar_index += 1;
        }
    }

    fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    fn current_time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_target_skips_emitted_boundary() {
        let clock = RealtimeClock::new(Uuid::new_v4(), Timeframe::M1, Duration::from_secs(30));
        let now = Utc::now();
        let first = clock.next_target(now);
        assert!(first > now);
        assert!(Timeframe::M1.is_aligned(first));

        *clock.last_emitted.lock().unwrap() = Some(first);
        let second = clock.next_target(now);
        assert_eq!(
            second.timestamp(),
            first.timestamp() + Timeframe::M1.duration_secs()
        );
    }

    #[tokio::test]
    async fn test_stop_wakes_waiting_clock() {
        let clock = Arc::new(RealtimeClock::new(
            Uuid::new_v4(),
            // A wide timeframe guarantees the clock is parked in its sleep.
            Timeframe::D1,
            Duration::from_secs(30),
        ));
        clock.on_tick(Arc::new(|_| Box::pin(async { Ok(()) })));

        let runner = clock.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        clock.stop();

        let outcome = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("clock must stop within the timeout")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ClockOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_run_without_handler_errors() {
        let clock = RealtimeClock::new(Uuid::new_v4(), Timeframe::M1, Duration::from_secs(30));
        assert!(matches!(clock.run().await, Err(ClockError::NoHandler)));
    }
}
