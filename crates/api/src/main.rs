//! API server entry point.

use std::sync::Arc;
use std::time::Duration;

use api::config::Config;
use common::Sku;
use orders::InMemoryOrderStore;
use reservation::{
    EngineConfig, InMemoryLedgerStore, InMemoryStockAuthority, PostgresStockAuthority,
    ReaperConfig, ReservationEngine, StockAuthority, TotalSource, spawn_reaper,
};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Connects the system of record: PostgreSQL when `PG_DSN` is set and
/// reachable, otherwise an in-memory authority pre-populated from the
/// fallback seed.
async fn connect_authority(config: &Config) -> Arc<dyn StockAuthority> {
    if let Some(dsn) = &config.pg_dsn {
        match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(dsn)
            .await
        {
            Ok(pool) => {
                tracing::info!("connected to PostgreSQL system of record");
                return Arc::new(PostgresStockAuthority::new(pool));
            }
            Err(e) => {
                tracing::warn!(error = %e, "PG_DSN set but unreachable; using in-memory system of record");
            }
        }
    }
    let authority = InMemoryStockAuthority::new();
    for (sku, qty) in &config.fallback_seed {
        authority.set_stock(&Sku::new(sku.clone()), *qty).await;
    }
    Arc::new(authority)
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Build stores and the engine per the configured total source
    let config = Config::from_env();
    let ledger = Arc::new(InMemoryLedgerStore::new());
    let authority = connect_authority(&config).await;

    let engine_config = EngineConfig {
        default_hold_ttl: chrono::Duration::seconds(config.default_hold_ttl_seconds),
    };
    let engine = Arc::new(match config.total_source {
        TotalSource::SelfManaged => {
            ReservationEngine::self_managed(ledger.clone(), engine_config)
        }
        TotalSource::ExternallyFed => {
            ReservationEngine::externally_fed(ledger.clone(), authority.clone(), engine_config)
        }
    });

    let state = Arc::new(api::AppState {
        engine: engine.clone(),
        orders: Arc::new(InMemoryOrderStore::new()),
        authority,
        config: config.clone(),
    });

    // 4. Seed counters from the system of record (fallback on error)
    match api::seed_counters(&state).await {
        Ok((source, seeded)) => {
            tracing::info!(source, skus = seeded.len(), "seeded ledger counters");
        }
        Err(e) => {
            tracing::error!(error = ?e, "counter seeding failed");
        }
    }

    // 5. Start the reaper for the externally-fed policy
    let reaper = match config.total_source {
        TotalSource::ExternallyFed => Some(spawn_reaper(
            engine,
            ReaperConfig {
                interval: Duration::from_secs(config.reaper_interval_secs),
                batch_limit: config.reaper_batch_limit,
                ..ReaperConfig::default()
            },
        )),
        TotalSource::SelfManaged => None,
    };

    // 6. Build the application and serve
    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, policy = ?config.total_source, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. Stop the reaper, bounded by its grace period
    if let Some(reaper) = reaper {
        reaper.shutdown().await;
    }

    tracing::info!("server shut down gracefully");
}
