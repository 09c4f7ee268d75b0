//! Hold lifecycle endpoints: reserve, commit, release, extend, snapshot,
//! events and seeding.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use common::{CartId, HoldId, Sku};
use reservation::{
    CommitOutcome, ExtendOutcome, ReleaseOutcome, ReserveOutcome, StockSnapshot,
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct ReserveRequest {
    pub sku: String,
    pub qty: i64,
    pub cart_id: String,
    pub ttl_seconds: Option<i64>,
}

#[derive(Deserialize)]
pub struct HoldRef {
    pub cart_id: String,
    pub sku: String,
}

fn default_add_seconds() -> i64 {
    60
}

#[derive(Deserialize)]
pub struct ExtendRequest {
    pub cart_id: String,
    pub sku: String,
    #[serde(default = "default_add_seconds")]
    pub add_seconds: i64,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default = "default_events_limit")]
    pub limit: usize,
}

fn default_events_limit() -> usize {
    20
}

// -- Response types --

#[derive(Serialize)]
pub struct ReserveResponse {
    pub ok: bool,
    pub reason: &'static str,
    pub hold_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub inventory: StockSnapshot,
}

#[derive(Serialize)]
pub struct CommitResponse {
    pub ok: bool,
    pub qty: i64,
    pub inventory: StockSnapshot,
}

#[derive(Serialize)]
pub struct ReleaseResponse {
    pub ok: bool,
    pub reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty: Option<i64>,
    pub inventory: StockSnapshot,
}

#[derive(Serialize)]
pub struct ExtendResponse {
    pub ok: bool,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct SnapshotResponse {
    pub sku: String,
    pub counters: StockSnapshot,
}

#[derive(Serialize)]
pub struct EventResponse {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub hold_id: String,
    pub sku: String,
    pub qty: i64,
    pub at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct SeedResponse {
    pub source: &'static str,
    pub seeded: Vec<SeededSku>,
}

#[derive(Serialize)]
pub struct SeededSku {
    pub sku: String,
    pub counters: StockSnapshot,
}

// -- Handlers --

/// POST /reserve — take a hold for a cart.
#[tracing::instrument(skip(state, req), fields(sku = %req.sku, cart_id = %req.cart_id))]
pub async fn reserve(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReserveRequest>,
) -> Result<Json<ReserveResponse>, ApiError> {
    if req.qty <= 0 {
        return Err(ApiError::BadRequest(format!(
            "qty must be a positive integer, got {}",
            req.qty
        )));
    }
    let sku = Sku::new(req.sku);
    let cart_id = CartId::new(req.cart_id);

    let outcome = state
        .engine
        .reserve(&sku, req.qty, &cart_id, req.ttl_seconds)
        .await?;
    let inventory = state.engine.snapshot(&sku).await?;

    let response = match outcome {
        ReserveOutcome::Reserved {
            hold_id,
            expires_at,
            ..
        } => ReserveResponse {
            ok: true,
            reason: "ok",
            hold_id: hold_id.to_string(),
            expires_at: Some(expires_at),
            inventory,
        },
        ReserveOutcome::AlreadyHeld {
            hold_id,
            expires_at,
        } => ReserveResponse {
            ok: true,
            reason: "already_held",
            hold_id: hold_id.to_string(),
            expires_at: Some(expires_at),
            inventory,
        },
        ReserveOutcome::Insufficient { .. } => ReserveResponse {
            ok: false,
            reason: "insufficient",
            hold_id: HoldId::for_cart_sku(&cart_id, &sku).to_string(),
            expires_at: None,
            inventory,
        },
    };
    Ok(Json(response))
}

/// POST /commit — finalize a cart's hold on one SKU.
#[tracing::instrument(skip(state, req), fields(sku = %req.sku, cart_id = %req.cart_id))]
pub async fn commit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HoldRef>,
) -> Result<Json<CommitResponse>, ApiError> {
    let sku = Sku::new(req.sku);
    let cart_id = CartId::new(req.cart_id);
    let hold_id = HoldId::for_cart_sku(&cart_id, &sku);

    match state.engine.commit(&sku, &hold_id).await? {
        CommitOutcome::Committed { qty } => {
            let inventory = state.engine.snapshot(&sku).await?;
            Ok(Json(CommitResponse {
                ok: true,
                qty,
                inventory,
            }))
        }
        CommitOutcome::NoHold => Err(ApiError::NotFound("hold not found".to_string())),
        CommitOutcome::SorConflict { qty } => Err(ApiError::Conflict(serde_json::json!({
            "error": "sor_conflict",
            "message": "authoritative stock is insufficient at commit time; hold released",
            "qty": qty,
        }))),
    }
}

/// POST /release — return a cart's hold on one SKU to the pool.
#[tracing::instrument(skip(state, req), fields(sku = %req.sku, cart_id = %req.cart_id))]
pub async fn release(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HoldRef>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    let sku = Sku::new(req.sku);
    let cart_id = CartId::new(req.cart_id);
    let hold_id = HoldId::for_cart_sku(&cart_id, &sku);

    let outcome = state.engine.release(&sku, &hold_id).await?;
    let inventory = state.engine.snapshot(&sku).await?;
    let response = match outcome {
        ReleaseOutcome::Released { qty } => ReleaseResponse {
            ok: true,
            reason: "ok",
            qty: Some(qty),
            inventory,
        },
        // Releasing twice is a safe no-op, reported as such.
        ReleaseOutcome::NoHold => ReleaseResponse {
            ok: false,
            reason: "no_hold",
            qty: None,
            inventory,
        },
    };
    Ok(Json(response))
}

/// POST /extend — push a hold's deadline out.
#[tracing::instrument(skip(state, req), fields(sku = %req.sku, cart_id = %req.cart_id))]
pub async fn extend(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExtendRequest>,
) -> Result<Json<ExtendResponse>, ApiError> {
    let sku = Sku::new(req.sku);
    let cart_id = CartId::new(req.cart_id);

    match state.engine.extend(&cart_id, &sku, req.add_seconds).await? {
        ExtendOutcome::Extended { expires_at } => Ok(Json(ExtendResponse {
            ok: true,
            expires_at,
        })),
        ExtendOutcome::NoHold => Err(ApiError::NotFound("hold not found".to_string())),
    }
}

/// GET /snapshot/:sku — read-only counter view.
#[tracing::instrument(skip(state))]
pub async fn snapshot(
    State(state): State<Arc<AppState>>,
    Path(sku): Path<String>,
) -> Result<Json<SnapshotResponse>, ApiError> {
    let counters = state.engine.snapshot(&Sku::new(sku.clone())).await?;
    Ok(Json(SnapshotResponse { sku, counters }))
}

/// GET /events — newest hold transitions, newest first.
#[tracing::instrument(skip(state))]
pub async fn events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<EventResponse>>, ApiError> {
    if !state.config.events_enabled {
        return Ok(Json(Vec::new()));
    }
    let records = state.engine.recent_events(query.limit).await?;
    Ok(Json(
        records
            .into_iter()
            .map(|record| EventResponse {
                id: record.id,
                kind: record.kind.as_str(),
                hold_id: record.hold_id.to_string(),
                sku: record.sku.to_string(),
                qty: record.qty,
                at: record.at,
            })
            .collect(),
    ))
}

/// POST /seed — re-run counter seeding from the system of record, with a
/// canned fallback on error.
#[tracing::instrument(skip(state))]
pub async fn seed(State(state): State<Arc<AppState>>) -> Result<Json<SeedResponse>, ApiError> {
    let (source, seeded) = crate::seed_counters(&state).await?;
    Ok(Json(SeedResponse { source, seeded }))
}
