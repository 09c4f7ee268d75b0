//! PostgreSQL integration tests for the ledger store and stock authority.
//!
//! These tests share one PostgreSQL container. Run with:
//!
//! ```bash
//! cargo test -p reservation --test postgres_integration
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{CartId, HoldId, Sku};
use reservation::{
    CommitOutcome, EngineConfig, LedgerStore, PostgresLedgerStore, PostgresStockAuthority,
    ReservationEngine, ReserveOutcome, ResolveOutcome, StockAuthority, TotalSource,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_reservation_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/002_create_inventory_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Fresh pool with cleared tables for test isolation.
async fn get_test_pool() -> PgPool {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();
    sqlx::query("TRUNCATE TABLE sku_counters, holds, leases, reservation_events, inventory")
        .execute(&pool)
        .await
        .unwrap();
    pool
}

fn sku() -> Sku {
    Sku::new("sku-123")
}

fn hold_for(cart: &str) -> HoldId {
    HoldId::for_cart_sku(&CartId::new(cart), &sku())
}

#[tokio::test]
#[serial]
async fn self_managed_lifecycle_round_trip() {
    let pool = get_test_pool().await;
    let store = Arc::new(PostgresLedgerStore::new(pool));
    let engine = ReservationEngine::self_managed(store, EngineConfig::default());
    engine.seed(&sku(), 10).await.unwrap();

    let outcome = engine
        .reserve(&sku(), 4, &CartId::new("cart-a"), Some(60))
        .await
        .unwrap();
    assert!(matches!(outcome, ReserveOutcome::Reserved { available: 6, .. }));

    // Idempotent retry.
    let retry = engine
        .reserve(&sku(), 4, &CartId::new("cart-a"), Some(60))
        .await
        .unwrap();
    assert!(matches!(retry, ReserveOutcome::AlreadyHeld { .. }));

    let snap = engine.snapshot(&sku()).await.unwrap();
    assert_eq!((snap.available, snap.reserved), (6, 4));

    let commit = engine.commit(&sku(), &hold_for("cart-a")).await.unwrap();
    assert_eq!(commit, CommitOutcome::Committed { qty: 4 });
    let replay = engine.commit(&sku(), &hold_for("cart-a")).await.unwrap();
    assert_eq!(replay, CommitOutcome::NoHold);

    let snap = engine.snapshot(&sku()).await.unwrap();
    assert_eq!((snap.available, snap.reserved), (6, 0));

    let events = engine.recent_events(10).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, reservation::HoldEventKind::HoldCommitted);
}

#[tokio::test]
#[serial]
async fn concurrent_reserves_on_last_unit_serialize_at_the_row_lock() {
    let pool = get_test_pool().await;
    let store = Arc::new(PostgresLedgerStore::new(pool));
    let engine = Arc::new(ReservationEngine::self_managed(
        store,
        EngineConfig::default(),
    ));
    engine.seed(&sku(), 1).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..6 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            engine
                .reserve(&sku(), 1, &CartId::new(format!("cart-{i}")), Some(60))
                .await
                .unwrap()
        }));
    }
    let mut wins = 0;
    for task in tasks {
        if matches!(task.await.unwrap(), ReserveOutcome::Reserved { .. }) {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);

    let snap = engine.snapshot(&sku()).await.unwrap();
    assert_eq!((snap.available, snap.reserved), (0, 1));
}

#[tokio::test]
#[serial]
async fn self_managed_expiry_folds_back_in_the_database() {
    let pool = get_test_pool().await;
    let store = Arc::new(PostgresLedgerStore::new(pool));
    let engine = ReservationEngine::self_managed(store.clone(), EngineConfig::default());
    engine.seed(&sku(), 10).await.unwrap();

    engine
        .reserve(&sku(), 4, &CartId::new("cart-a"), Some(1))
        .await
        .unwrap();

    // Drive the store directly with a synthetic clock past the deadline.
    let later = Utc::now() + Duration::seconds(5);
    let outcome = store
        .commit(TotalSource::SelfManaged, &sku(), &hold_for("cart-a"), later)
        .await
        .unwrap();
    assert_eq!(outcome, ResolveOutcome::NoHold);

    let snap = engine.snapshot(&sku()).await.unwrap();
    assert_eq!((snap.available, snap.reserved), (10, 0));
}

#[tokio::test]
#[serial]
async fn externally_fed_commit_debits_the_system_of_record() {
    let pool = get_test_pool().await;
    sqlx::query("INSERT INTO inventory (sku_id, total) VALUES ($1, $2)")
        .bind(sku().as_str())
        .bind(10i64)
        .execute(&pool)
        .await
        .unwrap();

    let store = Arc::new(PostgresLedgerStore::new(pool.clone()));
    let authority = Arc::new(PostgresStockAuthority::new(pool.clone()));
    let engine =
        ReservationEngine::externally_fed(store, authority.clone(), EngineConfig::default());

    // Cold start: ledger totals come from the seed read.
    for (seed_sku, qty) in authority.seed_read().await.unwrap() {
        engine.seed(&seed_sku, qty).await.unwrap();
    }

    engine
        .reserve(&sku(), 4, &CartId::new("cart-a"), Some(60))
        .await
        .unwrap();
    let outcome = engine.commit(&sku(), &hold_for("cart-a")).await.unwrap();
    assert_eq!(outcome, CommitOutcome::Committed { qty: 4 });

    let remaining: i64 = sqlx::query_scalar("SELECT total FROM inventory WHERE sku_id = $1")
        .bind(sku().as_str())
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 6);
}

#[tokio::test]
#[serial]
async fn stale_admission_conflicts_and_releases_the_hold() {
    let pool = get_test_pool().await;
    sqlx::query("INSERT INTO inventory (sku_id, total) VALUES ($1, $2)")
        .bind(sku().as_str())
        .bind(10i64)
        .execute(&pool)
        .await
        .unwrap();

    let store = Arc::new(PostgresLedgerStore::new(pool.clone()));
    let authority = Arc::new(PostgresStockAuthority::new(pool.clone()));
    let engine = ReservationEngine::externally_fed(store, authority, EngineConfig::default());
    engine.seed(&sku(), 10).await.unwrap();

    engine
        .reserve(&sku(), 8, &CartId::new("cart-a"), Some(60))
        .await
        .unwrap();

    // Another channel consumes authoritative stock before the commit.
    sqlx::query("UPDATE inventory SET total = 3 WHERE sku_id = $1")
        .bind(sku().as_str())
        .execute(&pool)
        .await
        .unwrap();

    let outcome = engine.commit(&sku(), &hold_for("cart-a")).await.unwrap();
    assert_eq!(outcome, CommitOutcome::SorConflict { qty: 8 });

    // Hold released, lease gone, stock not debited.
    let snap = engine.snapshot(&sku()).await.unwrap();
    assert_eq!(snap.reserved, 0);
    let leases: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leases")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(leases, 0);
    let total: i64 = sqlx::query_scalar("SELECT total FROM inventory WHERE sku_id = $1")
        .bind(sku().as_str())
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(total, 3);
}

#[tokio::test]
#[serial]
async fn sweep_releases_due_holds_from_the_lease_table() {
    let pool = get_test_pool().await;
    sqlx::query("INSERT INTO inventory (sku_id, total) VALUES ($1, $2)")
        .bind(sku().as_str())
        .bind(10i64)
        .execute(&pool)
        .await
        .unwrap();

    let store = Arc::new(PostgresLedgerStore::new(pool.clone()));
    let authority = Arc::new(PostgresStockAuthority::new(pool.clone()));
    let engine = ReservationEngine::externally_fed(store, authority, EngineConfig::default());
    engine.seed(&sku(), 10).await.unwrap();

    engine
        .reserve(&sku(), 5, &CartId::new("cart-d"), Some(1))
        .await
        .unwrap();

    let later = Utc::now() + Duration::seconds(2);
    assert_eq!(engine.sweep_expired(later, 100).await.unwrap(), 1);

    let snap = engine.snapshot(&sku()).await.unwrap();
    assert_eq!((snap.available, snap.reserved), (10, 0));
    let leases: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leases")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(leases, 0);
}
