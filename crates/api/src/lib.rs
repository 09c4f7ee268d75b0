//! HTTP API server with observability for the reservation system.
//!
//! Provides REST endpoints for the hold lifecycle and the order flow, with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use common::Sku;
use metrics_exporter_prometheus::PrometheusHandle;
use orders::{InMemoryOrderStore, OrderStore};
use reservation::{
    EngineConfig, InMemoryLedgerStore, InMemoryStockAuthority, ReservationEngine, StockAuthority,
    TotalSource,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use error::ApiError;
use routes::reservations::SeededSku;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub engine: Arc<ReservationEngine>,
    pub orders: Arc<dyn OrderStore>,
    pub authority: Arc<dyn StockAuthority>,
    pub config: Config,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/reserve", post(routes::reservations::reserve))
        .route("/commit", post(routes::reservations::commit))
        .route("/release", post(routes::reservations::release))
        .route("/extend", post(routes::reservations::extend))
        .route("/snapshot/{sku}", get(routes::reservations::snapshot))
        .route("/events", get(routes::reservations::events))
        .route("/seed", post(routes::reservations::seed))
        .route("/orders", post(routes::orders::create))
        .route("/orders/{id}/confirm", post(routes::orders::confirm))
        .route("/orders/{id}/cancel", post(routes::orders::cancel))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state backed entirely by in-memory stores, with the
/// in-memory system of record pre-populated from the configured fallback
/// seed. Used by the default binary path and the integration tests.
pub async fn create_in_memory_state(config: Config) -> Arc<AppState> {
    let ledger = Arc::new(InMemoryLedgerStore::new());
    let authority = Arc::new(InMemoryStockAuthority::new());
    for (sku, qty) in &config.fallback_seed {
        authority.set_stock(&Sku::new(sku.clone()), *qty).await;
    }

    let engine_config = EngineConfig {
        default_hold_ttl: chrono::Duration::seconds(config.default_hold_ttl_seconds),
    };
    let engine = match config.total_source {
        TotalSource::SelfManaged => ReservationEngine::self_managed(ledger, engine_config),
        TotalSource::ExternallyFed => {
            ReservationEngine::externally_fed(ledger, authority.clone(), engine_config)
        }
    };

    Arc::new(AppState {
        engine: Arc::new(engine),
        orders: Arc::new(InMemoryOrderStore::new()),
        authority,
        config,
    })
}

/// Seeds the ledger counters from the system of record, falling back to
/// the configured canned seed when the seed read fails. Returns the seed
/// source and the resulting counter views.
pub async fn seed_counters(
    state: &AppState,
) -> Result<(&'static str, Vec<SeededSku>), ApiError> {
    let (source, rows) = match state.authority.seed_read().await {
        Ok(rows) => ("authority", rows),
        Err(e) => {
            tracing::warn!(error = %e, "seed read from system of record failed; using fallback seed");
            let rows = state
                .config
                .fallback_seed
                .iter()
                .map(|(sku, qty)| (Sku::new(sku.clone()), *qty))
                .collect();
            ("fallback", rows)
        }
    };

    let mut seeded = Vec::with_capacity(rows.len());
    for (sku, qty) in rows {
        state.engine.seed(&sku, qty).await?;
        let counters = state.engine.snapshot(&sku).await?;
        seeded.push(SeededSku {
            sku: sku.to_string(),
            counters,
        });
    }
    Ok((source, seeded))
}
