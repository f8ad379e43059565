//! Prometheus Metrics Definitions
//!
//! Request metrics are recorded by the observability middleware. Cache and
//! ingestion gauges are sampled from the engine's own counters whenever
//! `/metrics` is scraped.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use ordercache_storage::{CacheStats, IngestSnapshot};
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge, register_int_gauge_vec,
    CounterVec, Encoder, HistogramVec, IntGauge, IntGaugeVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<OrderCacheMetrics>> = Lazy::new(OrderCacheMetrics::new);

fn registration_error(name: &str, err: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, err))
}

/// Container for all ordercache metrics.
#[derive(Clone)]
pub struct OrderCacheMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Entries currently materialized
    pub cache_entries: IntGauge,

    /// Cache hits since start
    pub cache_hits: IntGauge,

    /// Cache misses since start
    pub cache_misses: IntGauge,

    /// Orders persisted and cached since start
    pub ingest_applied: IntGauge,

    /// Orders dropped since start - labels: reason (invalid, store_failure)
    pub ingest_dropped: IntGaugeVec,
}

impl OrderCacheMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "ordercache_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| registration_error("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "ordercache_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("http_request_duration_seconds", e))?,

            cache_entries: register_int_gauge!(
                "ordercache_cache_entries",
                "Number of orders currently in the materialization cache"
            )
            .map_err(|e| registration_error("cache_entries", e))?,

            cache_hits: register_int_gauge!(
                "ordercache_cache_hits",
                "Cache hits since process start"
            )
            .map_err(|e| registration_error("cache_hits", e))?,

            cache_misses: register_int_gauge!(
                "ordercache_cache_misses",
                "Cache misses since process start"
            )
            .map_err(|e| registration_error("cache_misses", e))?,

            ingest_applied: register_int_gauge!(
                "ordercache_ingest_applied",
                "Orders persisted and cached since process start"
            )
            .map_err(|e| registration_error("ingest_applied", e))?,

            ingest_dropped: register_int_gauge_vec!(
                "ordercache_ingest_dropped",
                "Orders dropped since process start",
                &["reason"]
            )
            .map_err(|e| registration_error("ingest_dropped", e))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Copy engine counters into the gauges.
    pub fn sample(&self, cache: &CacheStats, ingest: &IngestSnapshot) {
        self.cache_entries.set(cache.entry_count as i64);
        self.cache_hits.set(cache.hits as i64);
        self.cache_misses.set(cache.misses as i64);
        self.ingest_applied.set(ingest.applied as i64);
        self.ingest_dropped
            .with_label_values(&["invalid"])
            .set(ingest.invalid as i64);
        self.ingest_dropped
            .with_label_values(&["store_failure"])
            .set(ingest.store_failures as i64);
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match METRICS.as_ref() {
        Ok(metrics) => metrics.sample(&state.cache.stats(), &state.ingestor.stats()),
        Err(e) => tracing::warn!(error = %e, "Metrics unavailable; serving default registry only"),
    }

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
