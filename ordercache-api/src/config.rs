//! Service Configuration Module
//!
//! Configuration is loaded from environment variables with defaults suitable
//! for local development. Every section has its own `from_env`; the
//! [`ServiceConfig`] aggregates them.

use std::net::SocketAddr;
use std::time::Duration;

use ordercache_storage::{IngestConfig, ResolverConfig};

use crate::constants::*;
use crate::db::DbConfig;
use crate::error::{ApiError, ApiResult};
use crate::kafka::KafkaConfig;

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind.
    pub bind_host: String,
    /// Port to bind.
    pub port: u16,
    /// Allowed CORS origins. Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,
    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,
    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_string(),
            port: DEFAULT_PORT,
            cors_origins: Vec::new(),
            cors_max_age_secs: DEFAULT_CORS_MAX_AGE_SECS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `ORDERCACHE_API_BIND`: Host to bind (default: 0.0.0.0)
    /// - `PORT` or `ORDERCACHE_API_PORT`: Port to bind (default: 8081)
    /// - `ORDERCACHE_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `ORDERCACHE_MAX_BODY_BYTES`: Request body limit (default: 1 MiB)
    ///
    /// A port that is set but does not parse is an error rather than a silent
    /// fallback.
    pub fn from_env() -> ApiResult<Self> {
        let bind_host = std::env::var("ORDERCACHE_API_BIND")
            .unwrap_or_else(|_| DEFAULT_BIND_HOST.to_string());

        let port = match std::env::var("PORT").or_else(|_| std::env::var("ORDERCACHE_API_PORT")) {
            Ok(raw) => parse_port(&raw)?,
            Err(_) => DEFAULT_PORT,
        };

        let cors_origins = std::env::var("ORDERCACHE_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_max_age_secs = std::env::var("ORDERCACHE_CORS_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CORS_MAX_AGE_SECS);

        let max_body_bytes = std::env::var("ORDERCACHE_MAX_BODY_BYTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_BODY_BYTES);

        Ok(Self {
            bind_host,
            port,
            cors_origins,
            cors_max_age_secs,
            max_body_bytes,
        })
    }

    /// Socket address to bind.
    pub fn bind_addr(&self) -> ApiResult<SocketAddr> {
        format!("{}:{}", self.bind_host, self.port)
            .parse()
            .map_err(|e| {
                ApiError::invalid_input(format!(
                    "Invalid bind address {}:{}: {}",
                    self.bind_host, self.port, e
                ))
            })
    }
}

fn parse_port(raw: &str) -> ApiResult<u16> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port: {:?}", raw)))
}

// ============================================================================
// ENGINE CONFIGURATION
// ============================================================================

/// Tuning for the ingestion loop and the read-through resolver.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Run the Kafka ingestion loop. When false, the write endpoint is the
    /// only ingestion path.
    pub ingest_enabled: bool,
    pub ingest: IngestConfig,
    pub resolver: ResolverConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ingest_enabled: true,
            ingest: IngestConfig::default(),
            resolver: ResolverConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Environment variables:
    /// - `ORDERCACHE_STORE_TIMEOUT_MS` (default: 5000)
    /// - `ORDERCACHE_PERSIST_RETRIES` (default: 0)
    /// - `ORDERCACHE_RETRY_BACKOFF_MS` (default: 200)
    /// - `ORDERCACHE_STREAM_ERROR_BACKOFF_MS` (default: 500)
    /// - `ORDERCACHE_SINGLE_FLIGHT`: "true" to collapse concurrent misses
    /// - `ORDERCACHE_INGEST_ENABLED`: "false" to skip the Kafka consumer
    pub fn from_env() -> Self {
        let store_timeout = env_millis("ORDERCACHE_STORE_TIMEOUT_MS").unwrap_or(DEFAULT_STORE_TIMEOUT);

        let persist_retries = std::env::var("ORDERCACHE_PERSIST_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let retry_backoff = env_millis("ORDERCACHE_RETRY_BACKOFF_MS").unwrap_or(DEFAULT_RETRY_BACKOFF);

        let stream_error_backoff =
            env_millis("ORDERCACHE_STREAM_ERROR_BACKOFF_MS").unwrap_or(DEFAULT_STREAM_ERROR_BACKOFF);

        let single_flight = std::env::var("ORDERCACHE_SINGLE_FLIGHT")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        let ingest_enabled = std::env::var("ORDERCACHE_INGEST_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            ingest_enabled,
            ingest: IngestConfig::default()
                .with_store_timeout(store_timeout)
                .with_stream_error_backoff(stream_error_backoff)
                .with_persist_retries(persist_retries, retry_backoff),
            resolver: ResolverConfig::default()
                .with_store_timeout(store_timeout)
                .with_single_flight(single_flight),
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
}

// ============================================================================
// SERVICE CONFIGURATION
// ============================================================================

/// Everything the service binary needs at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api: ApiConfig,
    pub db: DbConfig,
    pub kafka: KafkaConfig,
    pub engine: EngineConfig,
}

impl ServiceConfig {
    pub fn from_env() -> ApiResult<Self> {
        Ok(Self {
            api: ApiConfig::from_env()?,
            db: DbConfig::from_env(),
            kafka: KafkaConfig::from_env(),
            engine: EngineConfig::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert_eq!(config.port, 8081);
        assert_eq!(config.bind_host, "0.0.0.0");
        assert!(config.cors_origins.is_empty());
        assert_eq!(config.max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("8081").unwrap(), 8081);
        assert_eq!(parse_port(" 9000 ").unwrap(), 9000);

        let err = parse_port("eighty").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(parse_port("70000").is_err());
    }

    #[test]
    fn test_bind_addr() {
        let config = ApiConfig {
            bind_host: "127.0.0.1".to_string(),
            port: 3000,
            ..Default::default()
        };
        assert_eq!(config.bind_addr().unwrap().to_string(), "127.0.0.1:3000");

        let bad = ApiConfig {
            bind_host: "not a host".to_string(),
            ..Default::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert!(config.ingest_enabled);
        assert_eq!(config.ingest.persist_retries, 0);
        assert!(!config.resolver.single_flight);
        assert_eq!(config.resolver.store_timeout, DEFAULT_STORE_TIMEOUT);
    }
}
