use async_trait::async_trait;
use common::{CartId, OrderId, Sku};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::Result;
use crate::store::OrderStore;
use crate::types::{OrderLine, OrderStatus};

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn create_order(&self, cart_id: &CartId, items: &[OrderLine]) -> Result<OrderId> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "INSERT INTO orders (cart_id, status) VALUES ($1, 'PENDING') RETURNING id",
        )
        .bind(cart_id.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let order_id = OrderId::from_uuid(row.try_get::<Uuid, _>("id")?);

        for item in items {
            sqlx::query("INSERT INTO order_items (order_id, sku_id, qty) VALUES ($1, $2, $3)")
                .bind(order_id.as_uuid())
                .bind(item.sku.as_str())
                .bind(item.qty)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(order_id)
    }

    async fn get_order_items(&self, order_id: OrderId) -> Result<Vec<OrderLine>> {
        let rows = sqlx::query("SELECT sku_id, qty FROM order_items WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(OrderLine {
                    sku: Sku::new(row.try_get::<String, _>("sku_id")?),
                    qty: row.try_get("qty")?,
                })
            })
            .collect()
    }

    async fn get_order_cart_id(&self, order_id: OrderId) -> Result<Option<CartId>> {
        let row = sqlx::query("SELECT cart_id FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| Ok(CartId::new(row.try_get::<String, _>("cart_id")?)))
            .transpose()
    }

    async fn set_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<()> {
        sqlx::query("UPDATE orders SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(order_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
