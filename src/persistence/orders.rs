//! PostgreSQL order and fill store
//!
//! Fills are persisted in their own table so execution history survives
//! restart; loading an order rehydrates its fills in append order
//! (fill ids are ULIDs, so lexicographic order is creation order).

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{OrderStore, StoreError};
use crate::orders::{Fill, Liquidity, OrderState, OrderStatus, OrderType, Side, TimeInForce};

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fills_for(&self, order_id: Uuid) -> Result<Vec<Fill>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT fill_id, order_id, quantity, price, fee, ts, liquidity
            FROM fills
            WHERE order_id = $1
            ORDER BY fill_id
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_fill).collect()
    }

    async fn hydrate(&self, row: &PgRow) -> Result<OrderState, StoreError> {
        let mut order = row_to_order(row)?;
        order.fills = self.fills_for(order.id).await?;
        Ok(order)
    }
}

const ORDER_COLUMNS: &str = "id, run_id, client_order_id, symbol, side, order_type, quantity, \
                             limit_price, stop_price, time_in_force, status, exchange_order_id, \
                             filled_quantity, avg_fill_price, reject_reason, created_at, \
                             submitted_at, closed_at";

fn row_to_order(row: &PgRow) -> Result<OrderState, StoreError> {
    let side_id: i16 = row.get("side");
    let type_id: i16 = row.get("order_type");
    let tif_id: i16 = row.get("time_in_force");
    let status_id: i16 = row.get("status");
    Ok(OrderState {
        id: row.get("id"),
        run_id: row.get("run_id"),
        client_order_id: row.get("client_order_id"),
        symbol: row.get("symbol"),
        side: Side::from_id(side_id)
            .ok_or_else(|| StoreError::Decode(format!("unknown side id {side_id}")))?,
        order_type: OrderType::from_id(type_id)
            .ok_or_else(|| StoreError::Decode(format!("unknown order type id {type_id}")))?,
        quantity: row.get("quantity"),
        limit_price: row.get("limit_price"),
        stop_price: row.get("stop_price"),
        time_in_force: TimeInForce::from_id(tif_id)
            .ok_or_else(|| StoreError::Decode(format!("unknown time in force id {tif_id}")))?,
        status: OrderStatus::from_id(status_id)
            .ok_or_else(|| StoreError::Decode(format!("unknown order status id {status_id}")))?,
        exchange_order_id: row.get("exchange_order_id"),
        filled_quantity: row.get("filled_quantity"),
        avg_fill_price: row.get("avg_fill_price"),
        reject_reason: row.get("reject_reason"),
        created_at: row.get("created_at"),
        submitted_at: row.get("submitted_at"),
        closed_at: row.get("closed_at"),
        fills: Vec::new(),
    })
}

fn row_to_fill(row: &PgRow) -> Result<Fill, StoreError> {
    let liquidity: Option<i16> = row.get("liquidity");
    Ok(Fill {
        fill_id: row.get("fill_id"),
        order_id: row.get("order_id"),
        quantity: row.get("quantity"),
        price: row.get("price"),
        fee: row.get("fee"),
        ts: row.get("ts"),
        liquidity: liquidity.and_then(Liquidity::from_id),
    })
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, order: &OrderState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders
                (id, run_id, client_order_id, symbol, side, order_type, quantity,
                 limit_price, stop_price, time_in_force, status, exchange_order_id,
                 filled_quantity, avg_fill_price, reject_reason, created_at,
                 submitted_at, closed_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                 $16, $17, $18)
            "#,
        )
        .bind(order.id)
        .bind(order.run_id)
        .bind(&order.client_order_id)
        .bind(&order.symbol)
        .bind(order.side.id())
        .bind(order.order_type.id())
        .bind(order.quantity)
        .bind(order.limit_price)
        .bind(order.stop_price)
        .bind(order.time_in_force.id())
        .bind(order.status.id())
        .bind(&order.exchange_order_id)
        .bind(order.filled_quantity)
        .bind(order.avg_fill_price)
        .bind(&order.reject_reason)
        .bind(order.created_at)
        .bind(order.submitted_at)
        .bind(order.closed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, order: &OrderState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, exchange_order_id = $3, filled_quantity = $4,
                avg_fill_price = $5, reject_reason = $6, submitted_at = $7,
                closed_at = $8
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(order.status.id())
        .bind(&order.exchange_order_id)
        .bind(order.filled_quantity)
        .bind(order.avg_fill_price)
        .bind(&order.reject_reason)
        .bind(order.submitted_at)
        .bind(order.closed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_fill(&self, fill: &Fill) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO fills (fill_id, order_id, quantity, price, fee, ts, liquidity)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (fill_id) DO NOTHING
            "#,
        )
        .bind(&fill.fill_id)
        .bind(fill.order_id)
        .bind(fill.quantity)
        .bind(fill.price)
        .bind(fill.fee)
        .bind(fill.ts)
        .bind(fill.liquidity.map(|l| l.id()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<OrderState>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_client_id(
        &self,
        run_id: Uuid,
        client_order_id: &str,
    ) -> Result<Option<OrderState>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE run_id = $1 AND client_order_id = $2"
        ))
        .bind(run_id)
        .bind(client_order_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list(&self, run_id: Option<Uuid>) -> Result<Vec<OrderState>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE ($1::uuid IS NULL OR run_id = $1)
            ORDER BY created_at
            "#
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            orders.push(self.hydrate(row).await?);
        }
        Ok(orders)
    }

    async fn list_open(&self) -> Result<Vec<OrderState>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE status IN ($1, $2, $3)
            ORDER BY created_at
            "#
        ))
        .bind(OrderStatus::Submitted.id())
        .bind(OrderStatus::Accepted.id())
        .bind(OrderStatus::Partial.id())
        .fetch_all(&self.pool)
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            orders.push(self.hydrate(row).await?);
        }
        Ok(orders)
    }

    async fn has_fill(&self, fill_id: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 AS one FROM fills WHERE fill_id = $1")
            .bind(fill_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}
