use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{HoldId, Sku};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::error::{ReservationError, Result};
use crate::events::{EventRecord, HoldEventKind};
use crate::store::LedgerStore;
use crate::types::{
    ExtendOutcome, Hold, HoldRequest, ReserveOutcome, ResolveOutcome, StockSnapshot, TotalSource,
};

/// PostgreSQL-backed ledger store.
///
/// Each operation is one SQL transaction. The SKU counter row is locked
/// with `FOR UPDATE` before anything else, so concurrent operations on the
/// same SKU serialize on that row lock; hold rows are only touched after
/// the counter lock is held, keeping a single lock order across all
/// operations.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Creates a new PostgreSQL ledger store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_hold(row: PgRow) -> Result<Hold> {
        Ok(Hold {
            hold_id: HoldId::from_raw(row.try_get::<String, _>("hold_id")?),
            sku: Sku::new(row.try_get::<String, _>("sku")?),
            qty: row.try_get("qty")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    /// Creates the counter row on first touch and takes the row lock that
    /// serializes every operation on this SKU.
    async fn lock_counter_row(tx: &mut Transaction<'_, Postgres>, sku: &Sku) -> Result<()> {
        sqlx::query("INSERT INTO sku_counters (sku) VALUES ($1) ON CONFLICT (sku) DO NOTHING")
            .bind(sku.as_str())
            .execute(&mut **tx)
            .await?;
        sqlx::query("SELECT sku FROM sku_counters WHERE sku = $1 FOR UPDATE")
            .bind(sku.as_str())
            .fetch_one(&mut **tx)
            .await?;
        Ok(())
    }

    async fn read_counters(
        tx: &mut Transaction<'_, Postgres>,
        sku: &Sku,
    ) -> Result<(i64, i64, i64)> {
        let row = sqlx::query("SELECT available, reserved, total FROM sku_counters WHERE sku = $1")
            .bind(sku.as_str())
            .fetch_one(&mut **tx)
            .await?;
        Ok((
            row.try_get("available")?,
            row.try_get("reserved")?,
            row.try_get("total")?,
        ))
    }

    /// Self-managed native expiry, run after the counter lock is held: a
    /// hold past its deadline is deleted and folded back into the counters
    /// within the surrounding transaction.
    async fn expire_if_due(
        tx: &mut Transaction<'_, Postgres>,
        policy: TotalSource,
        sku: &Sku,
        hold_id: &HoldId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if policy != TotalSource::SelfManaged {
            return Ok(());
        }
        let expired =
            sqlx::query("DELETE FROM holds WHERE hold_id = $1 AND expires_at <= $2 RETURNING qty")
                .bind(hold_id.as_str())
                .bind(now)
                .fetch_optional(&mut **tx)
                .await?;
        if let Some(row) = expired {
            let qty: i64 = row.try_get("qty")?;
            sqlx::query(
                "UPDATE sku_counters SET available = available + $2, reserved = reserved - $2 WHERE sku = $1",
            )
            .bind(sku.as_str())
            .bind(qty)
            .execute(&mut **tx)
            .await?;
            Self::append_event(tx, HoldEventKind::HoldReleased, hold_id, sku, qty, now).await?;
        }
        Ok(())
    }

    async fn append_event(
        tx: &mut Transaction<'_, Postgres>,
        kind: HoldEventKind,
        hold_id: &HoldId,
        sku: &Sku,
        qty: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reservation_events (kind, hold_id, sku, qty, occurred_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(kind.as_str())
        .bind(hold_id.as_str())
        .bind(sku.as_str())
        .bind(qty)
        .bind(at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn reserve(
        &self,
        policy: TotalSource,
        req: &HoldRequest,
        now: DateTime<Utc>,
    ) -> Result<ReserveOutcome> {
        let hold_id = req.hold_id();
        let mut tx = self.pool.begin().await?;

        Self::lock_counter_row(&mut tx, &req.sku).await?;
        Self::expire_if_due(&mut tx, policy, &req.sku, &hold_id, now).await?;

        let existing =
            sqlx::query("SELECT hold_id, sku, qty, created_at, expires_at FROM holds WHERE hold_id = $1")
                .bind(hold_id.as_str())
                .fetch_optional(&mut *tx)
                .await?;
        if let Some(row) = existing {
            let hold = Self::row_to_hold(row)?;
            tx.commit().await?;
            return Ok(ReserveOutcome::AlreadyHeld {
                hold_id: hold.hold_id,
                expires_at: hold.expires_at,
            });
        }

        let (raw_available, reserved, total) = Self::read_counters(&mut tx, &req.sku).await?;
        let available = match policy {
            TotalSource::SelfManaged => raw_available,
            TotalSource::ExternallyFed => total - reserved,
        };
        if available < req.qty {
            tx.commit().await?;
            return Ok(ReserveOutcome::Insufficient { available });
        }

        match policy {
            TotalSource::SelfManaged => {
                sqlx::query(
                    "UPDATE sku_counters SET available = available - $2, reserved = reserved + $2 WHERE sku = $1",
                )
                .bind(req.sku.as_str())
                .bind(req.qty)
                .execute(&mut *tx)
                .await?;
            }
            TotalSource::ExternallyFed => {
                sqlx::query("UPDATE sku_counters SET reserved = reserved + $2 WHERE sku = $1")
                    .bind(req.sku.as_str())
                    .bind(req.qty)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let expires_at = now + req.ttl;
        sqlx::query(
            r#"
            INSERT INTO holds (hold_id, sku, qty, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(hold_id.as_str())
        .bind(req.sku.as_str())
        .bind(req.qty)
        .bind(now)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        if policy == TotalSource::ExternallyFed {
            sqlx::query(
                r#"
                INSERT INTO leases (hold_id, expires_at) VALUES ($1, $2)
                ON CONFLICT (hold_id) DO UPDATE SET expires_at = EXCLUDED.expires_at
                "#,
            )
            .bind(hold_id.as_str())
            .bind(expires_at)
            .execute(&mut *tx)
            .await?;
        }

        Self::append_event(
            &mut tx,
            HoldEventKind::HoldCreated,
            &hold_id,
            &req.sku,
            req.qty,
            now,
        )
        .await?;
        tx.commit().await?;

        Ok(ReserveOutcome::Reserved {
            hold_id,
            expires_at,
            available: available - req.qty,
        })
    }

    async fn commit(
        &self,
        policy: TotalSource,
        sku: &Sku,
        hold_id: &HoldId,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome> {
        let mut tx = self.pool.begin().await?;
        Self::lock_counter_row(&mut tx, sku).await?;
        Self::expire_if_due(&mut tx, policy, sku, hold_id, now).await?;

        let deleted = sqlx::query("DELETE FROM holds WHERE hold_id = $1 RETURNING qty")
            .bind(hold_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = deleted else {
            tx.commit().await?;
            return Ok(ResolveOutcome::NoHold);
        };
        let qty: i64 = row.try_get("qty")?;

        sqlx::query("UPDATE sku_counters SET reserved = reserved - $2 WHERE sku = $1")
            .bind(sku.as_str())
            .bind(qty)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM leases WHERE hold_id = $1")
            .bind(hold_id.as_str())
            .execute(&mut *tx)
            .await?;
        Self::append_event(&mut tx, HoldEventKind::HoldCommitted, hold_id, sku, qty, now).await?;
        tx.commit().await?;

        Ok(ResolveOutcome::Resolved { qty })
    }

    async fn release(
        &self,
        policy: TotalSource,
        sku: &Sku,
        hold_id: &HoldId,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome> {
        let mut tx = self.pool.begin().await?;
        Self::lock_counter_row(&mut tx, sku).await?;
        Self::expire_if_due(&mut tx, policy, sku, hold_id, now).await?;

        let deleted = sqlx::query("DELETE FROM holds WHERE hold_id = $1 RETURNING qty")
            .bind(hold_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = deleted else {
            // Stray index entries self-heal here.
            sqlx::query("DELETE FROM leases WHERE hold_id = $1")
                .bind(hold_id.as_str())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(ResolveOutcome::NoHold);
        };
        let qty: i64 = row.try_get("qty")?;

        match policy {
            TotalSource::SelfManaged => {
                sqlx::query(
                    "UPDATE sku_counters SET available = available + $2, reserved = reserved - $2 WHERE sku = $1",
                )
                .bind(sku.as_str())
                .bind(qty)
                .execute(&mut *tx)
                .await?;
            }
            TotalSource::ExternallyFed => {
                sqlx::query("UPDATE sku_counters SET reserved = reserved - $2 WHERE sku = $1")
                    .bind(sku.as_str())
                    .bind(qty)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        sqlx::query("DELETE FROM leases WHERE hold_id = $1")
            .bind(hold_id.as_str())
            .execute(&mut *tx)
            .await?;
        Self::append_event(&mut tx, HoldEventKind::HoldReleased, hold_id, sku, qty, now).await?;
        tx.commit().await?;

        Ok(ResolveOutcome::Resolved { qty })
    }

    async fn extend(
        &self,
        policy: TotalSource,
        hold_id: &HoldId,
        add: Duration,
        now: DateTime<Utc>,
    ) -> Result<ExtendOutcome> {
        let mut tx = self.pool.begin().await?;

        // Resolve the SKU without a lock first so the counter row can be
        // locked before the hold row (same lock order as the other ops).
        let peeked = sqlx::query("SELECT sku FROM holds WHERE hold_id = $1")
            .bind(hold_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = peeked else {
            tx.commit().await?;
            return Ok(ExtendOutcome::NoHold);
        };
        let sku = Sku::new(row.try_get::<String, _>("sku")?);

        Self::lock_counter_row(&mut tx, &sku).await?;
        Self::expire_if_due(&mut tx, policy, &sku, hold_id, now).await?;

        let current = sqlx::query("SELECT expires_at FROM holds WHERE hold_id = $1 FOR UPDATE")
            .bind(hold_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = current else {
            tx.commit().await?;
            return Ok(ExtendOutcome::NoHold);
        };
        let current: DateTime<Utc> = row.try_get("expires_at")?;
        let expires_at = current.max(now) + add;

        sqlx::query("UPDATE holds SET expires_at = $2 WHERE hold_id = $1")
            .bind(hold_id.as_str())
            .bind(expires_at)
            .execute(&mut *tx)
            .await?;
        if policy == TotalSource::ExternallyFed {
            sqlx::query(
                r#"
                INSERT INTO leases (hold_id, expires_at) VALUES ($1, $2)
                ON CONFLICT (hold_id) DO UPDATE SET expires_at = EXCLUDED.expires_at
                "#,
            )
            .bind(hold_id.as_str())
            .bind(expires_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(ExtendOutcome::Extended { expires_at })
    }

    async fn snapshot(&self, policy: TotalSource, sku: &Sku) -> Result<StockSnapshot> {
        let row = sqlx::query("SELECT available, reserved, total FROM sku_counters WHERE sku = $1")
            .bind(sku.as_str())
            .fetch_optional(&self.pool)
            .await?;
        let (available, reserved, total) = match row {
            Some(row) => (
                row.try_get("available")?,
                row.try_get("reserved")?,
                row.try_get("total")?,
            ),
            None => (0i64, 0i64, 0i64),
        };
        Ok(match policy {
            TotalSource::SelfManaged => StockSnapshot {
                available,
                reserved,
                total: None,
            },
            TotalSource::ExternallyFed => StockSnapshot {
                available: total - reserved,
                reserved,
                total: Some(total),
            },
        })
    }

    async fn get_hold(&self, hold_id: &HoldId) -> Result<Option<Hold>> {
        let row = sqlx::query(
            "SELECT hold_id, sku, qty, created_at, expires_at FROM holds WHERE hold_id = $1",
        )
        .bind(hold_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_hold).transpose()
    }

    async fn due_leases(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<HoldId>> {
        let rows = sqlx::query(
            r#"
            SELECT hold_id FROM leases
            WHERE expires_at <= $1
            ORDER BY expires_at ASC, hold_id ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| Ok(HoldId::from_raw(row.try_get::<String, _>("hold_id")?)))
            .collect()
    }

    async fn remove_lease(&self, hold_id: &HoldId) -> Result<()> {
        sqlx::query("DELETE FROM leases WHERE hold_id = $1")
            .bind(hold_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn seed_counters(&self, policy: TotalSource, sku: &Sku, qty: i64) -> Result<()> {
        let available = match policy {
            TotalSource::SelfManaged => qty,
            TotalSource::ExternallyFed => 0,
        };
        sqlx::query(
            r#"
            INSERT INTO sku_counters (sku, available, reserved, total)
            VALUES ($1, $2, 0, $3)
            ON CONFLICT (sku) DO UPDATE SET
                available = EXCLUDED.available,
                reserved = 0,
                total = EXCLUDED.total
            "#,
        )
        .bind(sku.as_str())
        .bind(available)
        .bind(qty)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_total(&self, sku: &Sku, total: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sku_counters (sku, total) VALUES ($1, $2)
            ON CONFLICT (sku) DO UPDATE SET total = EXCLUDED.total
            "#,
        )
        .bind(sku.as_str())
        .bind(total)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<EventRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, hold_id, sku, qty, occurred_at
            FROM reservation_events
            ORDER BY id DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let kind_raw: String = row.try_get("kind")?;
                let kind = HoldEventKind::parse(&kind_raw).ok_or_else(|| {
                    ReservationError::CorruptRecord(format!("unknown event kind {kind_raw:?}"))
                })?;
                Ok(EventRecord {
                    id: row.try_get("id")?,
                    kind,
                    hold_id: HoldId::from_raw(row.try_get::<String, _>("hold_id")?),
                    sku: Sku::new(row.try_get::<String, _>("sku")?),
                    qty: row.try_get("qty")?,
                    at: row.try_get("occurred_at")?,
                })
            })
            .collect()
    }
}
