//! HTTP Routes Module
//!
//! Includes:
//! - Order read and write endpoints
//! - Health check endpoints (Kubernetes-compatible)
//! - Prometheus metrics
//! - CORS support for browser-based clients

pub mod health;
pub mod order;

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware::from_fn,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::error::{ApiError, ErrorCode};
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

/// Build the complete router.
///
/// # Middleware Order (outer to inner)
/// 1. CORS (outermost) - handles preflight requests
/// 2. Observability - tracing span and metrics
/// 3. TraceLayer - per-request HTTP logs
/// 4. Body limit - enforced when the body is read
pub fn build_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = build_cors_layer(config);

    Router::new()
        .merge(order::create_router())
        .nest("/health", health::create_router())
        .route("/metrics", get(metrics_handler))
        .fallback(route_not_found)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(observability_middleware))
        .layer(cors)
        .with_state(state)
}

async fn route_not_found() -> ApiError {
    ApiError::from_code(ErrorCode::RouteNotFound)
}

// ============================================================================
// CORS LAYER
// ============================================================================

/// Build the CORS layer from ApiConfig.
///
/// In development mode (empty origins), allows all origins.
/// In production mode, only allows configured origins.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::HeaderName::from_static(
            crate::constants::CACHE_STATUS_HEADER,
        )])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}
