//! Run lifecycle scenarios: live failures, stop semantics, cleanup

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use weaver::adapter::{ExchangeAdapter, MockExchange};
use weaver::clock::Timeframe;
use weaver::config::{AppConfig, LogBackend};
use weaver::event_log::EventLog;
use weaver::events::{event_types, Envelope, RunEventPayload};
use weaver::runs::{ExchangeFactory, RunError, RunMode, RunSpec, RunStatus};
use weaver::system::Weaver;

fn in_memory_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.event_log.backend = LogBackend::InMemory;
    // Tests should never sit out a long grace period.
    config.run.stop_grace_seconds = 2;
    config
}

/// A daily timeframe keeps the realtime clock parked for the whole test.
fn spec(mode: RunMode) -> RunSpec {
    RunSpec {
        mode,
        strategy_id: "tick_buyer".to_string(),
        symbols: vec!["BTC/USD".to_string()],
        timeframe: Timeframe::D1,
        start_time: None,
        end_time: None,
    }
}

fn factory_of(adapter: Arc<MockExchange>) -> ExchangeFactory {
    Arc::new(move |_mode| Ok(adapter.clone() as Arc<dyn ExchangeAdapter>))
}

async fn await_status(weaver: &Weaver, run_id: Uuid, status: RunStatus) {
    for _ in 0..200 {
        let run = weaver.run_manager.get(run_id).await.unwrap();
        if run.status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    let run = weaver.run_manager.get(run_id).await.unwrap();
    panic!("run never reached {status}; stuck at {}", run.status);
}

/// Scenario: a live run whose exchange is unreachable transitions to ERROR
/// after retries; no zombie RUNNING state remains.
#[tokio::test]
async fn test_live_connect_failure_becomes_run_error() {
    let dead_exchange = Arc::new(MockExchange::new().with_connect_failure());
    let weaver = Weaver::build_in_memory_with_factory(
        in_memory_config(),
        Some(factory_of(dead_exchange)),
    );

    let run = weaver.run_manager.create(&spec(RunMode::Live)).await.unwrap();
    weaver.run_manager.start(run.id).await.unwrap();

    await_status(&weaver, run.id, RunStatus::Error).await;
    let run = weaver.run_manager.get(run.id).await.unwrap();
    assert!(run
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("connection"));

    // run.Error carries the message.
    let records = weaver.log.read_from(0, u32::MAX).await.unwrap();
    let error_event = records
        .iter()
        .map(|r| &r.envelope)
        .find(|e| e.event_type == event_types::RUN_ERROR)
        .expect("run.Error emitted");
    let payload: RunEventPayload = error_event.payload_as().unwrap();
    assert_eq!(payload.status, RunStatus::Error);
    assert!(payload.error_message.unwrap_or_default().contains("connection"));

    // The context is gone; nothing keeps running.
    for _ in 0..100 {
        if weaver.run_manager.active_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(weaver.run_manager.active_count(), 0);
    assert!(weaver.run_registry.is_empty());
}

/// Stopping a running run persists STOPPED within the grace period and
/// removes its subscriptions.
#[tokio::test]
async fn test_stop_releases_context_and_subscriptions() {
    let exchange = Arc::new(MockExchange::new());
    let weaver =
        Weaver::build_in_memory_with_factory(in_memory_config(), Some(factory_of(exchange)));

    let run = weaver.run_manager.create(&spec(RunMode::Paper)).await.unwrap();
    weaver.run_manager.start(run.id).await.unwrap();
    assert_eq!(weaver.run_manager.active_count(), 1);

    let stopped = weaver.run_manager.stop(run.id).await.unwrap();
    assert_eq!(stopped.status, RunStatus::Stopped);
    assert_eq!(weaver.run_manager.active_count(), 0);
    assert!(weaver.run_registry.is_empty());
    assert!(weaver.adapters.is_empty());

    let records = weaver.log.read_from(0, u32::MAX).await.unwrap();
    assert!(records
        .iter()
        .any(|r| r.envelope.event_type == event_types::RUN_STOPPED));

    // A tick for the stopped run finds no subscribers: the strategy runner
    // is detached, so no strategy.PlaceRequest follows.
    let before = records.len();
    let tick = Envelope::new(
        event_types::CLOCK_TICK,
        "test",
        serde_json::json!({
            "ts": Utc::now(),
            "timeframe": "1d",
            "bar_index": 0,
            "is_backtest": false,
        }),
    )
    .with_run(run.id);
    weaver.log.append(tick).await.unwrap();

    let after = weaver.log.read_from(0, u32::MAX).await.unwrap();
    assert_eq!(after.len(), before + 1);
}

/// Stop is idempotent on terminal runs and typed on pending ones.
#[tokio::test]
async fn test_stop_idempotency_and_pending_conflict() {
    let exchange = Arc::new(MockExchange::new());
    let weaver =
        Weaver::build_in_memory_with_factory(in_memory_config(), Some(factory_of(exchange)));

    let pending = weaver.run_manager.create(&spec(RunMode::Paper)).await.unwrap();
    let err = weaver.run_manager.stop(pending.id).await.unwrap_err();
    assert!(matches!(err, RunError::IllegalTransition { .. }));

    weaver.run_manager.start(pending.id).await.unwrap();
    let first = weaver.run_manager.stop(pending.id).await.unwrap();
    let second = weaver.run_manager.stop(pending.id).await.unwrap();
    assert_eq!(first.status, RunStatus::Stopped);
    assert_eq!(second.status, RunStatus::Stopped);

    // Exactly one run.Stopped event.
    let records = weaver.log.read_from(0, u32::MAX).await.unwrap();
    let stopped_events = records
        .iter()
        .filter(|r| r.envelope.event_type == event_types::RUN_STOPPED)
        .count();
    assert_eq!(stopped_events, 1);
}

/// Starting anything but a pending run is a typed conflict.
#[tokio::test]
async fn test_start_conflicts() {
    let exchange = Arc::new(MockExchange::new());
    let weaver =
        Weaver::build_in_memory_with_factory(in_memory_config(), Some(factory_of(exchange)));

    let missing = weaver.run_manager.start(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(missing, RunError::NotFound(_)));

    let run = weaver.run_manager.create(&spec(RunMode::Paper)).await.unwrap();
    weaver.run_manager.start(run.id).await.unwrap();
    let running = weaver.run_manager.start(run.id).await.unwrap_err();
    assert!(matches!(running, RunError::NotStartable { .. }));

    weaver.run_manager.stop(run.id).await.unwrap();
    let terminal = weaver.run_manager.start(run.id).await.unwrap_err();
    assert!(matches!(terminal, RunError::NotStartable { .. }));
}
