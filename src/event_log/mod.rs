//! Durable, append-only, ordered event log with in-process dispatch
//!
//! Two implementations, one contract:
//!
//! - [`MemoryEventLog`] keeps records in memory. It is the reference
//!   semantics for subscriber dispatch and backs isolated tests.
//! - [`PgEventLog`] persists records to the `outbox` table. It additionally
//!   signals other processes via `pg_notify`, but in-process delivery never
//!   depends on that signal.
//!
//! Both invoke matching subscribers synchronously during `append`, in
//! registration order, within the caller's task. A failing subscriber is
//! logged and skipped; the append still succeeds. Delivery is at-least-once:
//! consumers resume from a durable offset and dedupe by envelope id.

pub mod consumer;
pub mod durable;
pub mod error;
pub mod memory;
pub mod offsets;
pub mod subscribers;

pub use consumer::{EnvelopeHandler, LogConsumer};
pub use durable::PgEventLog;
pub use error::EventLogError;
pub use memory::MemoryEventLog;
pub use offsets::{MemoryOffsetStore, OffsetStore, PgOffsetStore};
pub use subscribers::{
    run_filter, Delivery, EventFilter, SubscriberCallback, SubscriberFuture, SubscriptionId,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::events::{Envelope, Seq};

/// One persisted log row.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    /// Monotonically increasing sequence number. Total order across runs.
    pub seq: Seq,
    pub envelope: Envelope,
    pub created_at: DateTime<Utc>,
}

/// Ordered, durable, at-least-once event distribution with replay.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Persist the envelope, assign its sequence number, then synchronously
    /// dispatch it to all matching subscribers.
    ///
    /// # Errors
    /// Fails on persistence error or a payload that does not match the
    /// registered shape for its type; no subscriber sees the envelope in
    /// either case. Subscriber failures do not fail the append.
    async fn append(&self, envelope: Envelope) -> Result<Seq, EventLogError>;

    /// Ordered records with sequence strictly greater than `after_seq`.
    async fn read_from(&self, after_seq: Seq, limit: u32) -> Result<Vec<OutboxRecord>, EventLogError>;

    /// Register an in-process subscriber.
    ///
    /// `types` are matched by literal equality; `"*"` matches every type.
    /// `filter` further narrows delivery when present. Subscriptions are
    /// memory-only and do not replay history.
    fn subscribe(
        &self,
        name: &str,
        types: &[&str],
        filter: Option<EventFilter>,
        callback: SubscriberCallback,
    ) -> SubscriptionId;

    /// Remove a subscription. Unknown ids are a no-op.
    fn unsubscribe(&self, subscription_id: SubscriptionId);
}
