//! Order endpoints: create, confirm (commit every line item) and cancel
//! (release every line item).

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{CartId, HoldId, OrderId, Sku};
use orders::{OrderLine, OrderStatus, OrderStore};
use reservation::{CommitOutcome, ReleaseOutcome};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub cart_id: String,
    pub items: Vec<OrderItemRequest>,
}

#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub sku: String,
    pub qty: i64,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    pub order_id: String,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct OrderResolvedResponse {
    pub order_id: String,
    pub status: &'static str,
    pub results: Vec<LineItemResult>,
}

#[derive(Serialize)]
pub struct LineItemResult {
    pub sku: String,
    pub hold_id: String,
    pub ok: bool,
    pub reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty: Option<i64>,
}

// -- Handlers --

/// POST /orders — create a PENDING order with its line items.
#[tracing::instrument(skip(state, req), fields(cart_id = %req.cart_id))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(axum::http::StatusCode, Json<OrderCreatedResponse>), ApiError> {
    let mut items = Vec::with_capacity(req.items.len());
    for item in &req.items {
        if item.qty <= 0 {
            return Err(ApiError::BadRequest(format!(
                "qty must be a positive integer for sku {}, got {}",
                item.sku, item.qty
            )));
        }
        items.push(OrderLine::new(Sku::new(item.sku.clone()), item.qty));
    }

    let cart_id = CartId::new(req.cart_id);
    let order_id = state.orders.create_order(&cart_id, &items).await?;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(OrderCreatedResponse {
            order_id: order_id.to_string(),
            status: OrderStatus::Pending.as_str(),
        }),
    ))
}

/// POST /orders/:id/confirm — mark the order CONFIRMED and commit the hold
/// for every line item.
#[tracing::instrument(skip(state))]
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResolvedResponse>, ApiError> {
    let (order_id, cart_id, items) = load_order(&state, &id).await?;
    state
        .orders
        .set_order_status(order_id, OrderStatus::Confirmed)
        .await?;

    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let hold_id = HoldId::for_cart_sku(&cart_id, &item.sku);
        let (ok, reason, qty) = match state.engine.commit(&item.sku, &hold_id).await? {
            CommitOutcome::Committed { qty } => (true, "ok", Some(qty)),
            CommitOutcome::NoHold => (false, "no_hold", None),
            CommitOutcome::SorConflict { qty } => (false, "sor_conflict", Some(qty)),
        };
        results.push(LineItemResult {
            sku: item.sku.to_string(),
            hold_id: hold_id.to_string(),
            ok,
            reason,
            qty,
        });
    }

    Ok(Json(OrderResolvedResponse {
        order_id: order_id.to_string(),
        status: OrderStatus::Confirmed.as_str(),
        results,
    }))
}

/// POST /orders/:id/cancel — mark the order CANCELLED and release the hold
/// for every line item.
#[tracing::instrument(skip(state))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResolvedResponse>, ApiError> {
    let (order_id, cart_id, items) = load_order(&state, &id).await?;
    state
        .orders
        .set_order_status(order_id, OrderStatus::Cancelled)
        .await?;

    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let hold_id = HoldId::for_cart_sku(&cart_id, &item.sku);
        let (ok, reason, qty) = match state.engine.release(&item.sku, &hold_id).await? {
            ReleaseOutcome::Released { qty } => (true, "ok", Some(qty)),
            ReleaseOutcome::NoHold => (false, "no_hold", None),
        };
        results.push(LineItemResult {
            sku: item.sku.to_string(),
            hold_id: hold_id.to_string(),
            ok,
            reason,
            qty,
        });
    }

    Ok(Json(OrderResolvedResponse {
        order_id: order_id.to_string(),
        status: OrderStatus::Cancelled.as_str(),
        results,
    }))
}

/// Strict-UUID parse plus existence checks shared by confirm and cancel.
async fn load_order(
    state: &AppState,
    raw_id: &str,
) -> Result<(OrderId, CartId, Vec<OrderLine>), ApiError> {
    let uuid = uuid::Uuid::parse_str(raw_id)
        .map_err(|e| ApiError::BadRequest(format!("invalid order id: {e}")))?;
    let order_id = OrderId::from_uuid(uuid);

    let items = state.orders.get_order_items(order_id).await?;
    if items.is_empty() {
        return Err(ApiError::NotFound(
            "order not found or has no items".to_string(),
        ));
    }
    let cart_id = state
        .orders
        .get_order_cart_id(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("order not found".to_string()))?;

    Ok((order_id, cart_id, items))
}
