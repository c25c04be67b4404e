//! PostgreSQL-backed event log (outbox pattern)
//!
//! The `outbox` table is the log: `seq` is a BIGSERIAL providing total
//! order, the envelope is stored as JSONB. After a committed insert the
//! envelope is dispatched to in-process subscribers and a `pg_notify`
//! signal is raised for other processes; in-process delivery never depends
//! on that signal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::warn;

use super::subscribers::{Delivery, EventFilter, SubscriberCallback, SubscriberSet, SubscriptionId};
use super::{EventLog, EventLogError, OutboxRecord};
use crate::events::{registry, Envelope, Seq};

/// Channel used to signal other processes about new log entries.
const NOTIFY_CHANNEL: &str = "weaver_outbox";

pub struct PgEventLog {
    pool: PgPool,
    subscribers: SubscriberSet,
}

impl PgEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            subscribers: SubscriberSet::new(),
        }
    }

    /// Highest assigned sequence number, 0 when empty.
    pub async fn last_seq(&self) -> Result<Seq, EventLogError> {
        let row = sqlx::query("SELECT COALESCE(MAX(seq), 0) AS seq FROM outbox")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("seq"))
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    async fn append(&self, envelope: Envelope) -> Result<Seq, EventLogError> {
        registry::validate(&envelope.event_type, &envelope.payload)?;

        let envelope_json = serde_json::to_value(&envelope)?;
        let row = sqlx::query(
            r#"
            INSERT INTO outbox (envelope, created_at)
            VALUES ($1, NOW())
            RETURNING seq
            "#,
        )
        .bind(&envelope_json)
        .fetch_one(&self.pool)
        .await?;
        let seq: i64 = row.get("seq");

        // Cross-process signal, best-effort.
        if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(seq.to_string())
            .execute(&self.pool)
            .await
        {
            warn!(seq, error = %e, "pg_notify failed; in-process delivery unaffected");
        }

        let delivery = Delivery { seq, envelope };
        self.subscribers.dispatch(&delivery).await;
        Ok(seq)
    }

    async fn read_from(&self, after_seq: Seq, limit: u32) -> Result<Vec<OutboxRecord>, EventLogError> {
        let rows = sqlx::query(
            r#"
            SELECT seq, envelope, created_at
            FROM outbox
            WHERE seq > $1
            ORDER BY seq
            LIMIT $2
            "#,
        )
        .bind(after_seq)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let envelope_json: serde_json::Value = row.get("envelope");
                let envelope: Envelope = serde_json::from_value(envelope_json)?;
                let created_at: DateTime<Utc> = row.get("created_at");
                Ok(OutboxRecord {
                    seq: row.get("seq"),
                    envelope,
                    created_at,
                })
            })
            .collect()
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
