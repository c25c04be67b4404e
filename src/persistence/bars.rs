//! PostgreSQL bar store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::{BarStore, StoreError};
use crate::clock::Timeframe;
use crate::market::Bar;

pub struct PgBarStore {
    pool: PgPool,
}

impl PgBarStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const BAR_COLUMNS: &str =
    "symbol, timeframe, ts, open, high, low, close, volume, trade_count, vwap";

fn row_to_bar(row: &PgRow) -> Result<Bar, StoreError> {
    let timeframe_str: String = row.get("timeframe");
    Ok(Bar {
        symbol: row.get("symbol"),
        timeframe: timeframe_str
            .parse::<Timeframe>()
            .map_err(|e| StoreError::Decode(e.to_string()))?,
        ts: row.get("ts"),
        open: row.get("open"),
        high: row.get("high"),
        low: row.get("low"),
        close: row.get("close"),
        volume: row.get("volume"),
        trade_count: row.get("trade_count"),
        vwap: row.get("vwap"),
    })
}

#[async_trait]
impl BarStore for PgBarStore {
    async fn upsert(&self, bars: &[Bar]) -> Result<u64, StoreError> {
        let mut written = 0u64;
        for bar in bars {
            let result = sqlx::query(
                r#"
                INSERT INTO bars
                    (symbol, timeframe, ts, open, high, low, close, volume, trade_count, vwap)
                VALUES
                    ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (symbol, timeframe, ts)
                DO UPDATE SET open = $4, high = $5, low = $6, close = $7,
                              volume = $8, trade_count = $9, vwap = $10
                "#,
            )
            .bind(&bar.symbol)
            .bind(bar.timeframe.as_str())
            .bind(bar.ts)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .bind(bar.trade_count)
            .bind(bar.vwap)
            .execute(&self.pool)
            .await?;
            written += result.rows_affected();
        }
        Ok(written)
    }

    async fn range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {BAR_COLUMNS} FROM bars
            WHERE symbol = $1 AND timeframe = $2 AND ts >= $3 AND ts <= $4
            ORDER BY ts
            "#
        ))
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_bar).collect()
    }

    async fn window_ending_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        end_ts: DateTime<Utc>,
        lookback: u32,
    ) -> Result<Vec<Bar>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {BAR_COLUMNS} FROM (
                SELECT {BAR_COLUMNS} FROM bars
                WHERE symbol = $1 AND timeframe = $2 AND ts <= $3
                ORDER BY ts DESC
                LIMIT $4
            ) window_bars
            ORDER BY ts
            "#
        ))
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(end_ts)
        .bind(lookback as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_bar).collect()
    }
}
