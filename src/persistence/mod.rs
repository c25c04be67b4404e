//! Persistence layer - typed readers/writers for runs, orders, fills, bars
//!
//! Every store has two implementations: PostgreSQL (production) and
//! in-memory (isolated tests). All queries are runtime-bound so the crate
//! builds without a database. One logical operation acquires and returns a
//! pooled connection within its own scope; there are no long-lived
//! sessions.

pub mod bars;
pub mod db;
pub mod memory;
pub mod orders;
pub mod runs;
pub mod schema;

pub use bars::PgBarStore;
pub use db::Database;
pub use memory::{MemoryBarStore, MemoryOrderStore, MemoryRunStore};
pub use orders::PgOrderStore;
pub use runs::PgRunStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::clock::Timeframe;
use crate::market::Bar;
use crate::orders::{Fill, OrderState};
use crate::runs::{Run, RunMode, RunStatus};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("row decode error: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}

/// Runs table access.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert(&self, run: &Run) -> Result<(), StoreError>;
    async fn update(&self, run: &Run) -> Result<(), StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<Run>, StoreError>;
    async fn list(
        &self,
        mode: Option<RunMode>,
        status: Option<RunStatus>,
    ) -> Result<Vec<Run>, StoreError>;
}

/// Orders and fills access. A reloaded order always carries its full fill
/// history in append order.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: &OrderState) -> Result<(), StoreError>;
    async fn update(&self, order: &OrderState) -> Result<(), StoreError>;
    async fn append_fill(&self, fill: &Fill) -> Result<(), StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<OrderState>, StoreError>;
    async fn find_by_client_id(
        &self,
        run_id: Uuid,
        client_order_id: &str,
    ) -> Result<Option<OrderState>, StoreError>;
    /// All orders, or the orders of one run. `None` spans every run,
    /// including runs persisted before a restart.
    async fn list(&self, run_id: Option<Uuid>) -> Result<Vec<OrderState>, StoreError>;
    /// Orders the exchange may still act on (submitted, accepted, partial).
    async fn list_open(&self) -> Result<Vec<OrderState>, StoreError>;
    async fn has_fill(&self, fill_id: &str) -> Result<bool, StoreError>;
}

/// Historical bars access.
#[async_trait]
pub trait BarStore: Send + Sync {
    /// Insert or replace by (symbol, timeframe, ts). Returns rows written.
    async fn upsert(&self, bars: &[Bar]) -> Result<u64, StoreError>;

    /// Bars with `start <= ts <= end`, ascending.
    async fn range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError>;

    /// The last `lookback` bars with `ts <= end_ts`, ascending.
    async fn window_ending_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        end_ts: DateTime<Utc>,
        lookback: u32,
    ) -> Result<Vec<Bar>, StoreError>;
}
