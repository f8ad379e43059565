//! Axum Middleware for HTTP Request Tracing and Metrics
//!
//! Wraps every request in a tracing span and records Prometheus metrics.

use axum::{extract::Request, middleware::Next, response::Response};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Instant;
use tracing::{info_span, Instrument};

use super::metrics::METRICS;

/// `/order/<anything>` collapses to one route label.
static ORDER_PATH: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^/order/[^/]+/?$").ok());

/// Normalize path for metrics/spans (replace order keys with a placeholder).
///
/// This prevents high-cardinality label explosion in Prometheus.
fn normalize_path(path: &str) -> String {
    match ORDER_PATH.as_ref() {
        Some(pattern) if pattern.is_match(path) => "/order/{order_uid}".to_string(),
        _ => path.to_string(),
    }
}

/// Observability middleware for Axum.
///
/// This middleware wraps every request with:
/// 1. A tracing span carrying method and route
/// 2. Prometheus metrics recording
/// 3. Request/response logging
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let normalized_path = normalize_path(&path);

    let span = info_span!(
        "http_request",
        http.method = %method,
        http.target = %path,
        http.route = %normalized_path,
    );

    let response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    let status = response.status();

    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_http_request(
            method.as_str(),
            &normalized_path,
            status.as_u16(),
            duration.as_secs_f64(),
        );
    }

    tracing::info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = duration.as_millis(),
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_order() {
        assert_eq!(normalize_path("/order/b563feb7b2b84b6test"), "/order/{order_uid}");
        assert_eq!(normalize_path("/order/abc/"), "/order/{order_uid}");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/order"), "/order");
        assert_eq!(normalize_path("/add"), "/add");
    }

    #[test]
    fn test_normalize_path_health() {
        assert_eq!(normalize_path("/health/ready"), "/health/ready");
    }
}
