//! In-memory event log
//!
//! Reference implementation of the dispatch semantics; used by isolated
//! tests and by the `in_memory` backend configuration. Records live in
//! process memory only and are lost on restart.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex;

use super::subscribers::{Delivery, EventFilter, SubscriberCallback, SubscriberSet, SubscriptionId};
use super::{EventLog, EventLogError, OutboxRecord};
use crate::events::{registry, Envelope, Seq};

pub struct MemoryEventLog {
    records: Mutex<Vec<OutboxRecord>>,
    subscribers: SubscriberSet,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            subscribers: SubscriberSet::new(),
        }
    }

    /// Highest assigned sequence number, 0 when empty.
    pub fn last_seq(&self) -> Seq {
        self.records
            .lock()
            .expect("record lock")
            .last()
            .map(|r| r.seq)
            .unwrap_or(0)
    }
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, envelope: Envelope) -> Result<Seq, EventLogError> {
        registry::validate(&envelope.event_type, &envelope.payload)?;

        let record = {
            let mut records = self.records.lock().expect("record lock");
            let seq = records.len() as Seq + 1;
            let record = OutboxRecord {
                seq,
                envelope,
                created_at: Utc::now(),
            };
            records.push(record.clone());
            record
        };

        // Dispatch outside the record lock so subscribers may append.
        let delivery = Delivery {
            seq: record.seq,
            envelope: record.envelope,
        };
        self.subscribers.dispatch(&delivery).await;
        Ok(delivery.seq)
    }

    async fn read_from(&self, after_seq: Seq, limit: u32) -> Result<Vec<OutboxRecord>, EventLogError> {
        let records = self.records.lock().expect("record lock");
        Ok(records
            .iter()
            .filter(|r| r.seq > after_seq)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    fn subscribe(
        &self,
        name: &str,
        types: &[&str],
        filter: Option<EventFilter>,
        callback: SubscriberCallback,
    ) -> SubscriptionId {
        self.subscribers.subscribe(name, types, filter, callback)
    }

    fn unsubscribe(&self, subscription_id: SubscriptionId) {
        self.subscribers.unsubscribe(subscription_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_types;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn tick_envelope() -> Envelope {
        let payload = serde_json::json!({
            "ts": Utc::now(),
            "timeframe": "1h",
            "bar_index": 0,
            "is_backtest": true,
        });
        Envelope::new(event_types::CLOCK_TICK, "test", payload)
    }

    #[tokio::test]
    async fn test_append_assigns_monotonic_seq() {
        let log = MemoryEventLog::new();
        assert_eq!(log.append(tick_envelope()).await.unwrap(), 1);
        assert_eq!(log.append(tick_envelope()).await.unwrap(), 2);
        assert_eq!(log.last_seq(), 2);
    }

    #[tokio::test]
    async fn test_append_then_read_exactly_once() {
        let log = MemoryEventLog::new();
        let env = tick_envelope();
        let seq = log.append(env.clone()).await.unwrap();

        let records = log.read_from(seq - 1, 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].envelope, env);

        assert!(log.read_from(seq, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_type_fails_before_dispatch() {
        let log = MemoryEventLog::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        log.subscribe(
            "all",
            &["*"],
            None,
            Arc::new(move |_| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        let bad = Envelope::new("not.AType", "test", serde_json::json!({}));
        assert!(log.append(bad).await.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(log.last_seq(), 0);
    }

    #[tokio::test]
    async fn test_reentrant_append_from_subscriber() {
        let log = Arc::new(MemoryEventLog::new());
        let inner = log.clone();
        log.subscribe(
            "chainer",
            &[event_types::CLOCK_TICK],
            None,
            Arc::new(move |delivery| {
                let inner = inner.clone();
                Box::pin(async move {
                    let child = delivery.envelope.caused(
                        event_types::STRATEGY_FETCH_WINDOW,
                        "chainer",
                        serde_json::json!({"symbol": "BTC/USD", "lookback": 5}),
                    );
                    inner.append(child).await?;
                    Ok(())
                })
            }),
        );

        log.append(tick_envelope()).await.unwrap();
        let records = log.read_from(0, 10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].envelope.event_type, event_types::STRATEGY_FETCH_WINDOW);
        assert_eq!(
            records[1].envelope.causation_id.as_deref(),
            Some(records[0].envelope.id.as_str())
        );
    }
}
