//! ordercache API - HTTP Service and Infrastructure Adapters
//!
//! Hosts the materialization engine from `ordercache-storage` behind an Axum
//! router, with PostgreSQL as the record store and Kafka as the event feed.

pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod kafka;
pub mod macros;
pub mod routes;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::{ApiConfig, EngineConfig, ServiceConfig};
pub use db::{DbClient, DbConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use kafka::{KafkaConfig, KafkaEventSource};
pub use routes::build_router;
pub use state::AppState;
