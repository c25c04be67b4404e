//! PostgreSQL run store

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{RunStore, StoreError};
use crate::clock::Timeframe;
use crate::runs::{Run, RunMode, RunStatus};

pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const RUN_COLUMNS: &str = "id, mode, strategy_id, symbols, timeframe, start_time, end_time, \
                           status, error_message, created_at, started_at, stopped_at";

fn row_to_run(row: &PgRow) -> Result<Run, StoreError> {
    let mode_id: i16 = row.get("mode");
    let status_id: i16 = row.get("status");
    let timeframe_str: String = row.get("timeframe");
    Ok(Run {
        id: row.get("id"),
        mode: RunMode::from_id(mode_id)
            .ok_or_else(|| StoreError::Decode(format!("unknown run mode id {mode_id}")))?,
        strategy_id: row.get("strategy_id"),
        symbols: row.get("symbols"),
        timeframe: timeframe_str
            .parse::<Timeframe>()
            .map_err(|e| StoreError::Decode(e.to_string()))?,
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        status: RunStatus::from_id(status_id)
            .ok_or_else(|| StoreError::Decode(format!("unknown run status id {status_id}")))?,
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        stopped_at: row.get("stopped_at"),
    })
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn insert(&self, run: &Run) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO runs
                (id, mode, strategy_id, symbols, timeframe, start_time, end_time,
                 status, error_message, created_at, started_at, stopped_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(run.id)
        .bind(run.mode.id())
        .bind(&run.strategy_id)
        .bind(&run.symbols)
        .bind(run.timeframe.as_str())
        .bind(run.start_time)
        .bind(run.end_time)
        .bind(run.status.id())
        .bind(&run.error_message)
        .bind(run.created_at)
        .bind(run.started_at)
        .bind(run.stopped_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, run: &Run) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE runs
            SET status = $2, error_message = $3, started_at = $4, stopped_at = $5
            WHERE id = $1
            "#,
        )
        .bind(run.id)
        .bind(run.status.id())
        .bind(&run.error_message)
        .bind(run.started_at)
        .bind(run.stopped_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_run(&r)).transpose()
    }

    async fn list(
        &self,
        mode: Option<RunMode>,
        status: Option<RunStatus>,
    ) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RUN_COLUMNS} FROM runs
            WHERE ($1::smallint IS NULL OR mode = $1)
              AND ($2::smallint IS NULL OR status = $2)
            ORDER BY created_at
            "#
        ))
        .bind(mode.map(|m| m.id()))
        .bind(status.map(|s| s.id()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_run).collect()
    }
}
