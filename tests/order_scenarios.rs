//! Order lifecycle scenarios against the in-memory stack

use std::sync::Arc;

use chrono::Utc;
use rust_decimal_macros::dec;
use uuid::Uuid;

use weaver::adapter::mock::{MockExchange, SubmitBehavior};
use weaver::adapter::AdapterRegistry;
use weaver::clock::Timeframe;
use weaver::event_log::{EventLog, MemoryEventLog};
use weaver::events::event_types;
use weaver::orders::{
    Fill, OrderIntent, OrderManager, OrderManagerConfig, OrderStatus, OrderType, Side,
};
use weaver::persistence::{MemoryOrderStore, OrderStore};
use weaver::runs::{RunMode, RunSpec};

struct Fixture {
    log: Arc<MemoryEventLog>,
    manager: OrderManager,
    mock: Arc<MockExchange>,
    run_id: Uuid,
}

fn fixture(behavior: SubmitBehavior) -> Fixture {
    let log = Arc::new(MemoryEventLog::new());
    let mock = Arc::new(MockExchange::new().with_submit_behavior(behavior));
    let adapters = Arc::new(AdapterRegistry::new());
    let run_id = Uuid::new_v4();
    adapters.register(run_id, mock.clone());
    let manager = OrderManager::new(
        Arc::new(MemoryOrderStore::new()),
        log.clone(),
        adapters,
        OrderManagerConfig::default(),
    );
    Fixture {
        log,
        manager,
        mock,
        run_id,
    }
}

fn intent(run_id: Uuid, client_order_id: &str, quantity: rust_decimal::Decimal) -> OrderIntent {
    OrderIntent {
        client_order_id: client_order_id.to_string(),
        run_id,
        symbol: "BTC/USD".to_string(),
        side: Side::Buy,
        order_type: OrderType::Market,
        quantity,
        limit_price: None,
        stop_price: None,
        time_in_force: None,
    }
}

async fn count_events(log: &MemoryEventLog, event_type: &str) -> usize {
    log.read_from(0, u32::MAX)
        .await
        .unwrap()
        .iter()
        .filter(|r| r.envelope.event_type == event_type)
        .count()
}

/// Scenario: duplicate submission of one logical order.
#[tokio::test]
async fn test_idempotent_order_submission() {
    let f = fixture(SubmitBehavior::Accept);

    // A paper run exists; its orders flow through the manager.
    let spec = RunSpec {
        mode: RunMode::Paper,
        strategy_id: "tick_buyer".to_string(),
        symbols: vec!["BTC/USD".to_string()],
        timeframe: Timeframe::M1,
        start_time: None,
        end_time: None,
    };
    assert!(spec.validate().is_ok());

    let first = f
        .manager
        .submit(&intent(f.run_id, "abc", dec!(10)), None)
        .await
        .unwrap();
    let second = f
        .manager
        .submit(&intent(f.run_id, "abc", dec!(10)), None)
        .await
        .unwrap();

    // One order, one orders.Created, one adapter call.
    assert_eq!(first.id, second.id);
    assert_eq!(count_events(&f.log, event_types::ORDERS_CREATED).await, 1);
    assert_eq!(f.mock.submit_attempts(), 1);
    assert_eq!(f.manager.list(Some(f.run_id)).await.unwrap().len(), 1);
}

/// Scenario: cancel after a terminal fill is a no-op.
#[tokio::test]
async fn test_cancel_after_fill_is_noop() {
    let f = fixture(SubmitBehavior::AcceptAndFill { price: dec!(50000) });

    let order = f
        .manager
        .submit(&intent(f.run_id, "c1", dec!(5)), None)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Filled);

    let after = f.manager.cancel(order.id, None).await.unwrap();
    assert_eq!(after.status, OrderStatus::Filled);
    assert_eq!(count_events(&f.log, event_types::ORDERS_CANCELLED).await, 0);
}

/// An order with N fills reloads with its fills intact, in order.
#[tokio::test]
async fn test_order_round_trip_preserves_fills() {
    let store = Arc::new(MemoryOrderStore::new());
    let log = Arc::new(MemoryEventLog::new());
    let adapters = Arc::new(AdapterRegistry::new());
    let run_id = Uuid::new_v4();
    adapters.register(run_id, Arc::new(MockExchange::new()));
    let manager = OrderManager::new(store.clone(), log, adapters, OrderManagerConfig::default());

    let order = manager
        .submit(&intent(run_id, "rt", dec!(9)), None)
        .await
        .unwrap();
    for (qty, price) in [(dec!(2), dec!(100)), (dec!(3), dec!(101)), (dec!(4), dec!(99))] {
        let fill = Fill::new(order.id, qty, price, dec!(0.1), Utc::now());
        manager.record_fill(order.id, fill, None).await.unwrap();
    }

    let reloaded = store.get(order.id).await.unwrap().unwrap();
    assert_eq!(reloaded.fills.len(), 3);
    assert_eq!(reloaded.filled_quantity, dec!(9));
    assert_eq!(reloaded.status, OrderStatus::Filled);
    let quantities: Vec<_> = reloaded.fills.iter().map(|fill| fill.quantity).collect();
    assert_eq!(quantities, vec![dec!(2), dec!(3), dec!(4)]);
    let total: rust_decimal::Decimal = quantities.iter().sum();
    assert_eq!(total, reloaded.filled_quantity);
}

/// `list` without a run filter spans every persisted run.
#[tokio::test]
async fn test_list_spans_all_runs() {
    let log = Arc::new(MemoryEventLog::new());
    let store = Arc::new(MemoryOrderStore::new());
    let adapters = Arc::new(AdapterRegistry::new());
    let run_a = Uuid::new_v4();
    let run_b = Uuid::new_v4();
    adapters.register(run_a, Arc::new(MockExchange::new()));
    adapters.register(run_b, Arc::new(MockExchange::new()));
    let manager = OrderManager::new(store, log, adapters, OrderManagerConfig::default());

    manager.submit(&intent(run_a, "a1", dec!(1)), None).await.unwrap();
    manager.submit(&intent(run_b, "b1", dec!(1)), None).await.unwrap();
    manager.submit(&intent(run_b, "b2", dec!(1)), None).await.unwrap();

    assert_eq!(manager.list(Some(run_a)).await.unwrap().len(), 1);
    assert_eq!(manager.list(Some(run_b)).await.unwrap().len(), 2);
    // The unfiltered view is repository-backed: every run's orders appear.
    assert_eq!(manager.list(None).await.unwrap().len(), 3);
}
