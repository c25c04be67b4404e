//! At-least-once delivery with idempotent consumers
//!
//! A consumer that crashes between processing and its offset write is
//! redelivered the in-flight envelope on restart; a side-effect guard
//! keyed by envelope id keeps the projection correct.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use weaver::event_log::{
    Delivery, EnvelopeHandler, EventLog, LogConsumer, MemoryEventLog, MemoryOffsetStore,
    OffsetStore,
};
use weaver::events::{event_types, Envelope};

/// Projection counting orders it has seen, deduplicated by envelope id.
struct OrderCounter {
    applied: HashSet<String>,
    count: usize,
}

impl OrderCounter {
    fn new() -> Self {
        Self {
            applied: HashSet::new(),
            count: 0,
        }
    }
}

#[async_trait]
impl EnvelopeHandler for OrderCounter {
    async fn handle(&mut self, delivery: &Delivery) -> anyhow::Result<()> {
        if delivery.envelope.event_type != event_types::ORDERS_CREATED {
            return Ok(());
        }
        if self.applied.insert(delivery.envelope.id.clone()) {
            self.count += 1;
        }
        Ok(())
    }
}

fn created_envelope(i: u32) -> Envelope {
    Envelope::new(
        event_types::ORDERS_CREATED,
        "replay_test",
        serde_json::json!({
            "order_id": uuid::Uuid::new_v4(),
            "run_id": uuid::Uuid::new_v4(),
            "client_order_id": format!("order-{i}"),
            "symbol": "BTC/USD",
            "side": "buy",
            "status": "submitting",
            "quantity": "1",
            "filled_quantity": "0",
        }),
    )
}

#[tokio::test]
async fn test_crash_between_process_and_offset_redelivers_once() {
    let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::new());
    let offsets = Arc::new(MemoryOffsetStore::new());
    for i in 0..10 {
        log.append(created_envelope(i)).await.unwrap();
    }

    let consumer = LogConsumer::new("order_projection", log.clone(), offsets.clone());
    let mut handler = OrderCounter::new();
    assert_eq!(consumer.poll_once(&mut handler).await.unwrap(), 10);
    assert_eq!(handler.count, 10);
    assert_eq!(offsets.get("order_projection").await.unwrap(), Some(10));

    // Simulate the crash: processing finished but the last offset write
    // was lost. Restart redelivers from the stored offset.
    offsets.set("order_projection", 8).await.unwrap();
    let redelivered = consumer.poll_once(&mut handler).await.unwrap();
    assert_eq!(redelivered, 2);

    // The guard collapsed the duplicates; the projection did not move.
    assert_eq!(handler.count, 10);
    assert_eq!(offsets.get("order_projection").await.unwrap(), Some(10));
}

#[tokio::test]
async fn test_fresh_consumer_replays_from_zero() {
    let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::new());
    let offsets = Arc::new(MemoryOffsetStore::new());
    for i in 0..5 {
        log.append(created_envelope(i)).await.unwrap();
    }

    // Two independent consumers, two cursors.
    let first = LogConsumer::new("projection_a", log.clone(), offsets.clone());
    let second = LogConsumer::new("projection_b", log.clone(), offsets.clone());
    let mut handler_a = OrderCounter::new();
    let mut handler_b = OrderCounter::new();

    assert_eq!(first.poll_once(&mut handler_a).await.unwrap(), 5);
    assert_eq!(second.poll_once(&mut handler_b).await.unwrap(), 5);
    assert_eq!(handler_a.count, 5);
    assert_eq!(handler_b.count, 5);
}
