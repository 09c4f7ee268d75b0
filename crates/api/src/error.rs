//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use orders::OrderStoreError;
use reservation::ReservationError;

/// API-level error type that maps to HTTP responses.
///
/// Protocol conflicts that carry structured detail (a refused debit, for
/// example) use [`ApiError::Conflict`] so the caller can machine-read the
/// reason.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Expected protocol conflict with structured detail.
    Conflict(serde_json::Value),
    /// Reservation engine error.
    Reservation(ReservationError),
    /// Order store error.
    OrderStore(OrderStoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": msg }),
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": msg }),
            ),
            ApiError::Conflict(detail) => (StatusCode::CONFLICT, detail),
            ApiError::Reservation(err) => reservation_error_to_response(err),
            ApiError::OrderStore(err) => {
                tracing::error!(error = %err, "order store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": err.to_string() }),
                )
            }
        };
        (status, axum::Json(body)).into_response()
    }
}

fn reservation_error_to_response(err: ReservationError) -> (StatusCode, serde_json::Value) {
    let status = match &err {
        ReservationError::InvalidQuantity(_) | ReservationError::InvalidExtension(_) => {
            StatusCode::BAD_REQUEST
        }
        ReservationError::Database(_) | ReservationError::CorruptRecord(_) => {
            tracing::error!(error = %err, "reservation infrastructure failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, serde_json::json!({ "error": err.to_string() }))
}

impl From<ReservationError> for ApiError {
    fn from(err: ReservationError) -> Self {
        ApiError::Reservation(err)
    }
}

impl From<OrderStoreError> for ApiError {
    fn from(err: OrderStoreError) -> Self {
        ApiError::OrderStore(err)
    }
}
