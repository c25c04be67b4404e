//! Embedded schema bootstrap
//!
//! Migration tooling is an external concern; the core creates its tables
//! idempotently at startup so a fresh database is usable immediately.

use sqlx::PgPool;

use super::StoreError;

/// DDL statements, applied in order. Every statement is idempotent.
const DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS outbox (
        seq         BIGSERIAL PRIMARY KEY,
        envelope    JSONB NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS consumer_offsets (
        consumer_name       TEXT PRIMARY KEY,
        last_processed_seq  BIGINT NOT NULL,
        updated_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS runs (
        id             UUID PRIMARY KEY,
        mode           SMALLINT NOT NULL,
        strategy_id    TEXT NOT NULL,
        symbols        TEXT[] NOT NULL,
        timeframe      TEXT NOT NULL,
        start_time     TIMESTAMPTZ,
        end_time       TIMESTAMPTZ,
        status         SMALLINT NOT NULL,
        error_message  TEXT,
        created_at     TIMESTAMPTZ NOT NULL,
        started_at     TIMESTAMPTZ,
        stopped_at     TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        id                 UUID PRIMARY KEY,
        run_id             UUID NOT NULL,
        client_order_id    TEXT NOT NULL,
        symbol             TEXT NOT NULL,
        side               SMALLINT NOT NULL,
        order_type         SMALLINT NOT NULL,
        quantity           NUMERIC NOT NULL,
        limit_price        NUMERIC,
        stop_price         NUMERIC,
        time_in_force      SMALLINT NOT NULL,
        status             SMALLINT NOT NULL,
        exchange_order_id  TEXT,
        filled_quantity    NUMERIC NOT NULL DEFAULT 0,
        avg_fill_price     NUMERIC,
        reject_reason      TEXT,
        created_at         TIMESTAMPTZ NOT NULL,
        submitted_at       TIMESTAMPTZ,
        closed_at          TIMESTAMPTZ,
        UNIQUE (run_id, client_order_id)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_orders_run_id ON orders (run_id)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_orders_status ON orders (status)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fills (
        fill_id    TEXT PRIMARY KEY,
        order_id   UUID NOT NULL REFERENCES orders (id),
        quantity   NUMERIC NOT NULL,
        price      NUMERIC NOT NULL,
        fee        NUMERIC NOT NULL DEFAULT 0,
        ts         TIMESTAMPTZ NOT NULL,
        liquidity  SMALLINT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_fills_order_id ON fills (order_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bars (
        symbol       TEXT NOT NULL,
        timeframe    TEXT NOT NULL,
        ts           TIMESTAMPTZ NOT NULL,
        open         NUMERIC NOT NULL,
        high         NUMERIC NOT NULL,
        low          NUMERIC NOT NULL,
        close        NUMERIC NOT NULL,
        volume       NUMERIC NOT NULL,
        trade_count  BIGINT,
        vwap         NUMERIC,
        PRIMARY KEY (symbol, timeframe, ts)
    )
    "#,
];

/// Apply the schema. Safe to call on every startup.
pub async fn bootstrap(pool: &PgPool) -> Result<(), StoreError> {
    for statement in DDL {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!(statements = DDL.len(), "Schema bootstrap complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_statement_is_idempotent() {
        for statement in DDL {
            assert!(
                statement.contains("IF NOT EXISTS"),
                "non-idempotent DDL: {statement}"
            );
        }
    }

    #[test]
    fn test_expected_tables_present() {
        let all = DDL.join("\n");
        for table in ["outbox", "consumer_offsets", "runs", "orders", "fills", "bars"] {
            assert!(
                all.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")),
                "missing table {table}"
            );
        }
    }
}
