//! Per-consumer durable cursors into the log
//!
//! A consumer updates its offset only after processing, so a crash between
//! processing and the offset write redelivers the in-flight envelope.
//! Consumers therefore dedupe by envelope id or their own side-effect
//! guard.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::error::EventLogError;
use crate::events::Seq;

#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Last processed sequence for `consumer_name`, if any.
    async fn get(&self, consumer_name: &str) -> Result<Option<Seq>, EventLogError>;

    /// Durably record `seq` as processed. Atomic per consumer.
    async fn set(&self, consumer_name: &str, seq: Seq) -> Result<(), EventLogError>;
}

/// PostgreSQL-backed offsets (`consumer_offsets` table).
pub struct PgOffsetStore {
    pool: PgPool,
}

impl PgOffsetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OffsetStore for PgOffsetStore {
    async fn get(&self, consumer_name: &str) -> Result<Option<Seq>, EventLogError> {
        let row = sqlx::query(
            "SELECT last_processed_seq FROM consumer_offsets WHERE consumer_name = $1",
        )
        .bind(consumer_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<i64, _>("last_processed_seq")))
    }

    async fn set(&self, consumer_name: &str, seq: Seq) -> Result<(), EventLogError> {
        sqlx::query(
            r#"
            INSERT INTO consumer_offsets (consumer_name, last_processed_seq, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (consumer_name)
            DO UPDATE SET last_processed_seq = $2, updated_at = NOW()
            "#,
        )
        .bind(consumer_name)
        .bind(seq)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// In-memory offsets for isolated tests.
#[derive(Default)]
pub struct MemoryOffsetStore {
    offsets: Mutex<HashMap<String, Seq>>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OffsetStore for MemoryOffsetStore {
    async fn get(&self, consumer_name: &str) -> Result<Option<Seq>, EventLogError> {
        Ok(self.offsets.lock().expect("offset lock").get(consumer_name).copied())
    }

    async fn set(&self, consumer_name: &str, seq: Seq) -> Result<(), EventLogError> {
        self.offsets
            .lock()
            .expect("offset lock")
            .insert(consumer_name.to_string(), seq);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_offsets_roundtrip() {
        let store = MemoryOffsetStore::new();
        assert_eq!(store.get("sse").await.unwrap(), None);

        store.set("sse", 42).await.unwrap();
        assert_eq!(store.get("sse").await.unwrap(), Some(42));

        store.set("sse", 100).await.unwrap();
        assert_eq!(store.get("sse").await.unwrap(), Some(100));

        assert_eq!(store.get("other").await.unwrap(), None);
    }
}
