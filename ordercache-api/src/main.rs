//! ordercache API Server Entry Point
//!
//! Startup order: telemetry, configuration, store schema, cache rehydration,
//! ingestion loop, HTTP listener. Any failure before the listener is bound is
//! fatal. On Ctrl-C or SIGTERM the server drains, the ingestion loop is
//! cancelled and waited for, and the process exits.

use std::sync::Arc;

use ordercache_api::telemetry::{init_tracing, TelemetryConfig};
use ordercache_api::{
    build_router, ApiError, ApiResult, AppState, DbClient, KafkaEventSource, ServiceConfig,
};
use ordercache_storage::{RecordStore, Rehydrator};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::from_env();
    init_tracing(&telemetry_config)?;

    let config = ServiceConfig::from_env()?;
    tracing::info!(db = ?config.db, kafka = ?config.kafka, "Configuration loaded");

    let db = DbClient::from_config(&config.db)?;
    db.ensure_schema().await?;
    let store: Arc<dyn RecordStore> = Arc::new(db);

    let state = AppState::with_store(store, &config.engine);

    let report = Rehydrator::new(
        Arc::clone(&state.store),
        Arc::clone(&state.cache),
        config.engine.ingest.store_timeout,
    )
    .rehydrate()
    .await
    .map_err(|e| ApiError::service_unavailable(format!("Rehydration failed: {}", e)))?;
    tracing::info!(loaded = report.loaded, skipped = report.skipped, "Cache ready");

    let cancel = CancellationToken::new();
    let ingest_task = if config.engine.ingest_enabled {
        let mut source = KafkaEventSource::connect(&config.kafka)?;
        let ingestor = state.ingestor.clone();
        let token = cancel.clone();
        Some(tokio::spawn(async move {
            ingestor.run(&mut source, token).await;
        }))
    } else {
        tracing::warn!("Kafka ingestion disabled; only the write endpoint ingests orders");
        None
    };

    let app = build_router(state, &config.api);
    let addr = config.api.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;
    tracing::info!(%addr, "Starting ordercache API server");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)));

    // The server can also stop on its own error; the loop must stop either way.
    cancel.cancel();
    stop_ingestion(ingest_task).await;

    tracing::info!("Shutdown complete");
    result
}

async fn stop_ingestion(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Ingestion task ended abnormally");
        }
    }
}

/// Resolve on Ctrl-C or SIGTERM, cancelling `cancel` first.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
    cancel.cancel();
}
