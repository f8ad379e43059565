//! Order Endpoints
//!
//! - `GET /order/:order_uid` resolves through the cache, falling back to the
//!   store, and returns the stored payload verbatim.
//! - `POST /order` (and the legacy `POST /add`) validate, persist and cache a
//!   full order document.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ordercache_storage::{Ingestor, ReadThroughResolver};
use serde::{Deserialize, Serialize};

use crate::constants::CACHE_STATUS_HEADER;
use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

/// Body returned after a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub order_uid: String,
    pub status: String,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /order/:order_uid
pub async fn get_order(
    State(resolver): State<Arc<ReadThroughResolver>>,
    Path(order_uid): Path<String>,
) -> ApiResult<Response> {
    let resolved = resolver.resolve(&order_uid).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (
                header::HeaderName::from_static(CACHE_STATUS_HEADER),
                HeaderValue::from_static(resolved.source.as_str()),
            ),
        ],
        resolved.record.payload().clone(),
    )
        .into_response())
}

/// POST /order
pub async fn create_order(
    State(ingestor): State<Ingestor>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<(StatusCode, Json<StoredResponse>)> {
    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::from_code(ErrorCode::PayloadTooLarge)
        } else {
            ApiError::invalid_input(rejection.body_text())
        }
    })?;

    let record = ingestor.apply(body).await?;
    tracing::info!(order_uid = %record.key(), bytes = record.len(), "Order stored via HTTP");

    Ok((
        StatusCode::CREATED,
        Json(StoredResponse {
            order_uid: record.key().to_string(),
            status: "stored".to_string(),
        }),
    ))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/order", post(create_order))
        .route("/add", post(create_order))
        .route("/order/:order_uid", get(get_order))
}
