//! System-of-record boundary: conditional debit and cold-start seeding.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::Sku;
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;

use crate::Result;

/// The external system of record for authoritative stock.
///
/// The engine only ever calls two things here: the commit-time conditional
/// debit and the seed read. It never writes `total` through any other path;
/// mirroring `total` back into the ledger is the CDC feed's job.
#[async_trait]
pub trait StockAuthority: Send + Sync {
    /// Subtracts `qty` from authoritative stock if and only if the stock is
    /// at least `qty`, as one atomic read-check-write transaction.
    /// Returns whether the debit was applied.
    async fn conditional_debit(&self, sku: &Sku, qty: i64) -> Result<bool>;

    /// Reads `(sku, qty)` pairs for cold-start population of the ledger
    /// counters.
    async fn seed_read(&self) -> Result<Vec<(Sku, i64)>>;
}

/// PostgreSQL system of record.
#[derive(Clone)]
pub struct PostgresStockAuthority {
    pool: PgPool,
}

impl PostgresStockAuthority {
    /// Creates a new PostgreSQL stock authority.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StockAuthority for PostgresStockAuthority {
    async fn conditional_debit(&self, sku: &Sku, qty: i64) -> Result<bool> {
        // The WHERE clause carries the check; a single UPDATE is atomic at
        // the database without an explicit transaction block.
        let row = sqlx::query(
            r#"
            UPDATE inventory SET total = total - $2
            WHERE sku_id = $1 AND total >= $2
            RETURNING total
            "#,
        )
        .bind(sku.as_str())
        .bind(qty)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn seed_read(&self) -> Result<Vec<(Sku, i64)>> {
        let rows = sqlx::query("SELECT sku_id, total FROM inventory")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok((
                    Sku::new(row.try_get::<String, _>("sku_id")?),
                    row.try_get("total")?,
                ))
            })
            .collect()
    }
}

/// In-memory system of record for tests and infrastructure-free runs.
#[derive(Clone, Default)]
pub struct InMemoryStockAuthority {
    stock: Arc<RwLock<HashMap<Sku, i64>>>,
}

impl InMemoryStockAuthority {
    /// Creates a new empty authority.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the authoritative stock for a SKU.
    pub async fn set_stock(&self, sku: &Sku, qty: i64) {
        self.stock.write().await.insert(sku.clone(), qty);
    }

    /// Returns the authoritative stock for a SKU.
    pub async fn stock(&self, sku: &Sku) -> i64 {
        self.stock.read().await.get(sku).copied().unwrap_or(0)
    }
}

#[async_trait]
impl StockAuthority for InMemoryStockAuthority {
    async fn conditional_debit(&self, sku: &Sku, qty: i64) -> Result<bool> {
        let mut stock = self.stock.write().await;
        let entry = stock.entry(sku.clone()).or_insert(0);
        if *entry < qty {
            return Ok(false);
        }
        *entry -= qty;
        Ok(true)
    }

    async fn seed_read(&self) -> Result<Vec<(Sku, i64)>> {
        let stock = self.stock.read().await;
        Ok(stock.iter().map(|(sku, qty)| (sku.clone(), *qty)).collect())
    }
}
