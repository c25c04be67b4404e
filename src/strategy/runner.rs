//! Strategy runner - binds one strategy instance to one run's event stream
//!
//! Translates `clock.Tick` and `data.WindowReady` into strategy callbacks
//! and the returned actions into `strategy.*` envelopes. The runner reports
//! strategy failures on the run's error channel; the run manager turns them
//! into `run.Error`.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::{DataWindow, Strategy, StrategyAction};
use crate::clock::ClockTick;
use crate::event_log::{run_filter, Delivery, EventLog, SubscriptionId};
use crate::events::{event_types, ClockTickPayload, DataWindowPayload, Envelope, FetchWindowPayload};
use crate::orders::OrderIntent;

const PRODUCER: &str = "strategy_runner";

pub struct StrategyRunner {
    run_id: Uuid,
    log: Arc<dyn EventLog>,
    strategy: Arc<tokio::sync::Mutex<Box<dyn Strategy>>>,
    error_tx: mpsc::UnboundedSender<String>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl StrategyRunner {
    pub fn new(
        run_id: Uuid,
        log: Arc<dyn EventLog>,
        strategy: Box<dyn Strategy>,
        error_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            run_id,
            log,
            strategy: Arc::new(tokio::sync::Mutex::new(strategy)),
            error_tx,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Attach the run-scoped subscriptions.
    pub fn initialize(&self) {
        let mut subscriptions = self.subscriptions.lock().expect("subscription lock");

        let run_id = self.run_id;
        let log = self.log.clone();
        let strategy = self.strategy.clone();
        let error_tx = self.error_tx.clone();
        subscriptions.push(self.log.subscribe(
            "strategy_runner.tick",
            &[event_types::CLOCK_TICK],
            Some(run_filter(run_id)),
            Arc::new(move |delivery| {
                let log = log.clone();
                let strategy = strategy.clone();
                let error_tx = error_tx.clone();
                Box::pin(async move {
                    let payload: ClockTickPayload = delivery.envelope.payload_as()?;
                    let tick = ClockTick {
                        run_id,
                        ts: payload.ts,
                        timeframe: payload.timeframe,
                        bar_index: payload.bar_index,
                        is_backtest: payload.is_backtest,
                    };
                    let result = strategy.lock().await.on_tick(&tick).await;
                    emit_actions(run_id, &log, &delivery, result, &error_tx).await
                })
            }),
        ));

        let run_id = self.run_id;
        let log = self.log.clone();
        let strategy = self.strategy.clone();
        let error_tx = self.error_tx.clone();
        subscriptions.push(self.log.subscribe(
            "strategy_runner.data",
            &[event_types::DATA_WINDOW_READY],
            Some(run_filter(run_id)),
            Arc::new(move |delivery| {
                let log = log.clone();
                let strategy = strategy.clone();
                let error_tx = error_tx.clone();
                Box::pin(async move {
                    let payload: DataWindowPayload = delivery.envelope.payload_as()?;
                    let window = DataWindow {
                        symbol: payload.symbol,
                        end_ts: payload.end_ts,
                        bars: payload.bars,
                    };
                    let result = strategy.lock().await.on_data(&window).await;
                    emit_actions(run_id, &log, &delivery, result, &error_tx).await
                })
            }),
        ));
    }

    /// Remove subscriptions and release the strategy.
    pub fn cleanup(&self) {
        let mut subscriptions = self.subscriptions.lock().expect("subscription lock");
        for id in subscriptions.drain(..) {
            self.log.unsubscribe(id);
        }
        debug!(run_id = %self.run_id, "Strategy runner cleaned up");
    }
}

impl Drop for StrategyRunner {
    fn drop(&mut self) {
        // Subscriptions must not outlive the runner, even on abort paths.
        let subscriptions: Vec<SubscriptionId> = self
            .subscriptions
            .lock()
            .map(|mut s| s.drain(..).collect())
            .unwrap_or_default();
        for id in subscriptions {
            self.log.unsubscribe(id);
        }
    }
}

/// Translate strategy actions into envelopes caused by the triggering
/// event. A strategy failure goes to the run error channel and is also
/// surfaced to the dispatcher.
async fn emit_actions(
    run_id: Uuid,
    log: &Arc<dyn EventLog>,
    delivery: &Delivery,
    result: anyhow::Result<Vec<StrategyAction>>,
    error_tx: &mpsc::UnboundedSender<String>,
) -> anyhow::Result<()> {
    let actions = match result {
        Ok(actions) => actions,
        Err(e) => {
            let message = format!("strategy failed: {e}");
            let _ = error_tx.send(message.clone());
            anyhow::bail!(message);
        }
    };

    for action in actions {
        let envelope: Envelope = match action {
            StrategyAction::FetchWindow { symbol, lookback } => {
                let payload = FetchWindowPayload {
                    symbol,
                    lookback,
                    end_ts: None,
                };
                delivery.envelope.caused(
                    event_types::STRATEGY_FETCH_WINDOW,
                    PRODUCER,
                    serde_json::to_value(&payload)?,
                )
            }
            StrategyAction::PlaceOrder(request) => {
                let intent = OrderIntent {
                    client_order_id: request.client_order_id,
                    run_id,
                    symbol: request.symbol,
                    side: request.side,
                    order_type: request.order_type,
                    quantity: request.quantity,
                    limit_price: request.limit_price,
                    stop_price: request.stop_price,
                    time_in_force: request.time_in_force,
                };
                delivery.envelope.caused(
                    event_types::STRATEGY_PLACE_REQUEST,
                    PRODUCER,
                    serde_json::to_value(&intent)?,
                )
            }
        };
        log.append(envelope).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timeframe;
    use crate::event_log::MemoryEventLog;
    use crate::strategy::builtin::TickBuyer;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn tick_envelope(run_id: Uuid, bar_index: u64) -> Envelope {
        let payload = ClockTickPayload {
            ts: Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
            timeframe: Timeframe::H1,
            bar_index,
            is_backtest: true,
        };
        Envelope::new(
            event_types::CLOCK_TICK,
            "clock",
            serde_json::to_value(&payload).unwrap(),
        )
        .with_run(run_id)
    }

    #[tokio::test]
    async fn test_tick_produces_place_request() {
        let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::new());
        let run_id = Uuid::new_v4();
        let (error_tx, _error_rx) = mpsc::unbounded_channel();
        let runner = StrategyRunner::new(
            run_id,
            log.clone(),
            Box::new(TickBuyer::new("BTC/USD", dec!(1))),
            error_tx,
        );
        runner.initialize();

        let tick = tick_envelope(run_id, 0);
        let tick_id = tick.id.clone();
        log.append(tick).await.unwrap();

        let records = log.read_from(0, 10).await.unwrap();
        assert_eq!(records.len(), 2);
        let request = &records[1].envelope;
        assert_eq!(request.event_type, event_types::STRATEGY_PLACE_REQUEST);
        assert_eq!(request.causation_id.as_deref(), Some(tick_id.as_str()));
        assert_eq!(request.run_id, Some(run_id));

        let intent: OrderIntent = request.payload_as().unwrap();
        assert_eq!(intent.run_id, run_id);
        assert_eq!(intent.client_order_id, "tick-buyer-0");
    }

    #[tokio::test]
    async fn test_other_runs_ticks_ignored() {
        let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::new());
        let run_id = Uuid::new_v4();
        let (error_tx, _error_rx) = mpsc::unbounded_channel();
        let runner = StrategyRunner::new(
            run_id,
            log.clone(),
            Box::new(TickBuyer::new("BTC/USD", dec!(1))),
            error_tx,
        );
        runner.initialize();

        log.append(tick_envelope(Uuid::new_v4(), 0)).await.unwrap();
        assert_eq!(log.read_from(0, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_unsubscribes() {
        let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::new());
        let run_id = Uuid::new_v4();
        let (error_tx, _error_rx) = mpsc::unbounded_channel();
        let runner = StrategyRunner::new(
            run_id,
            log.clone(),
            Box::new(TickBuyer::new("BTC/USD", dec!(1))),
            error_tx,
        );
        runner.initialize();
        runner.cleanup();

        log.append(tick_envelope(run_id, 0)).await.unwrap();
        assert_eq!(log.read_from(0, 10).await.unwrap().len(), 1);
    }

    #[derive(Debug)]
    struct Failing;

    #[async_trait::async_trait]
    impl Strategy for Failing {
        fn id(&self) -> &str {
            "failing"
        }

        async fn on_tick(&mut self, _tick: &ClockTick) -> anyhow::Result<Vec<StrategyAction>> {
            anyhow::bail!("bad math")
        }

        async fn on_data(&mut self, _window: &DataWindow) -> anyhow::Result<Vec<StrategyAction>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_strategy_failure_reaches_error_channel() {
        let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::new());
        let run_id = Uuid::new_v4();
        let (error_tx, mut error_rx) = mpsc::unbounded_channel();
        let runner = StrategyRunner::new(run_id, log.clone(), Box::new(Failing), error_tx);
        runner.initialize();

        log.append(tick_envelope(run_id, 0)).await.unwrap();
        let message = error_rx.try_recv().unwrap();
        assert!(message.contains("bad math"));
    }
}
