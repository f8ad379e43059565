//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling using deadpool-postgres, plus the
//! [`RecordStore`] implementation backing the materialization engine.
//!
//! Orders live in a single `orders` table keyed by `order_uid`. Tables this
//! service creates store the payload as TEXT rather than JSONB so the stored
//! bytes are returned exactly as they were written. An existing table with a
//! `jsonb` payload column is still served: reads cast to text and writes cast
//! to jsonb, and PostgreSQL's normalized rendering is what comes back.

use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use bytes::Bytes;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime, Timeouts};
use ordercache_core::{OrderKey, StoreError};
use ordercache_storage::RecordStore;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::NoTls;

const CREATE_ORDERS_TABLE: &str = "CREATE TABLE IF NOT EXISTS orders (
    order_uid TEXT PRIMARY KEY,
    order_json TEXT NOT NULL
)";

const PAYLOAD_COLUMN_TYPE: &str = "SELECT data_type FROM information_schema.columns
    WHERE table_schema = current_schema() AND table_name = 'orders' AND column_name = 'order_json'";

const UPSERT_ORDER: &str = "INSERT INTO orders (order_uid, order_json) VALUES ($1, $2)
    ON CONFLICT (order_uid) DO UPDATE SET order_json = EXCLUDED.order_json";

const UPSERT_ORDER_JSONB: &str = "INSERT INTO orders (order_uid, order_json) VALUES ($1, $2::text::jsonb)
    ON CONFLICT (order_uid) DO UPDATE SET order_json = EXCLUDED.order_json";

const SELECT_ORDER: &str = "SELECT order_json::text FROM orders WHERE order_uid = $1";

const SELECT_ALL_ORDERS: &str = "SELECT order_uid, order_json::text FROM orders";

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Clone)]
pub struct DbConfig {
    /// Full connection string. Takes precedence over the discrete fields.
    pub dsn: Option<String>,
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection timeout
    pub timeout: Duration,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("dsn", &self.dsn.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("max_size", &self.max_size)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            dsn: None,
            host: "localhost".to_string(),
            port: 5432,
            dbname: "orders".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            dsn: std::env::var("POSTGRES_DSN").ok().filter(|s| !s.trim().is_empty()),
            host: std::env::var("ORDERCACHE_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("ORDERCACHE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("ORDERCACHE_DB_NAME").unwrap_or_else(|_| "orders".to_string()),
            user: std::env::var("ORDERCACHE_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("ORDERCACHE_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("ORDERCACHE_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("ORDERCACHE_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        match &self.dsn {
            Some(dsn) => cfg.url = Some(dsn.clone()),
            None => {
                cfg.host = Some(self.host.clone());
                cfg.port = Some(self.port);
                cfg.dbname = Some(self.dbname.clone());
                cfg.user = Some(self.user.clone());
                cfg.password = Some(self.password.clone());
            }
        }

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: self.max_size,
            timeouts: Timeouts::wait_millis(self.timeout.as_millis() as u64),
            ..Default::default()
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// DATABASE CLIENT WRAPPER
// ============================================================================

/// Database client that wraps a connection pool and stores orders.
#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
    jsonb_payload: Arc<AtomicBool>,
}

impl DbClient {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            jsonb_payload: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Create the `orders` table if it does not exist and detect the payload
    /// column type of an existing one.
    pub async fn ensure_schema(&self) -> ApiResult<()> {
        let conn = self.pool.get().await?;
        conn.batch_execute(CREATE_ORDERS_TABLE).await?;

        let column_type: Option<String> = conn
            .query_opt(PAYLOAD_COLUMN_TYPE, &[])
            .await?
            .map(|row| row.try_get(0))
            .transpose()?;
        let jsonb = column_type.as_deref() == Some("jsonb");
        if jsonb {
            tracing::warn!("orders.order_json is jsonb; payloads are stored in normalized form");
        }
        self.jsonb_payload.store(jsonb, Ordering::Relaxed);

        tracing::info!(payload_column = column_type.as_deref().unwrap_or("unknown"), "Orders schema ready");
        Ok(())
    }

    fn upsert_statement(&self) -> &'static str {
        upsert_statement(self.jsonb_payload.load(Ordering::Relaxed))
    }

    async fn get_conn(&self, operation: &'static str) -> Result<deadpool_postgres::Object, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| unavailable(operation, e))
    }
}

fn unavailable(operation: &'static str, err: impl fmt::Display) -> StoreError {
    tracing::error!(operation, error = %err, "Order store operation failed");
    StoreError::Unavailable {
        reason: format!("{} failed: {}", operation, err),
    }
}

fn upsert_statement(jsonb_payload: bool) -> &'static str {
    if jsonb_payload {
        UPSERT_ORDER_JSONB
    } else {
        UPSERT_ORDER
    }
}

fn payload_text(operation: &'static str, payload: &Bytes) -> Result<String, StoreError> {
    String::from_utf8(payload.to_vec()).map_err(|e| unavailable(operation, e))
}

#[async_trait]
impl RecordStore for DbClient {
    async fn upsert(&self, key: &OrderKey, payload: &Bytes) -> Result<(), StoreError> {
        let text = payload_text("upsert", payload)?;
        let conn = self.get_conn("upsert").await?;
        conn.execute(self.upsert_statement(), &[&key.as_str(), &text])
            .await
            .map_err(|e| unavailable("upsert", e))?;
        Ok(())
    }

    async fn lookup_one(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let conn = self.get_conn("lookup_one").await?;
        let row = conn
            .query_opt(SELECT_ORDER, &[&key])
            .await
            .map_err(|e| unavailable("lookup_one", e))?;

        match row {
            Some(row) => {
                let json: String = row.try_get(0).map_err(|e| unavailable("lookup_one", e))?;
                Ok(Some(Bytes::from(json)))
            }
            None => Ok(None),
        }
    }

    async fn lookup_all(&self) -> Result<Vec<(String, Bytes)>, StoreError> {
        let conn = self.get_conn("lookup_all").await?;
        let rows = conn
            .query(SELECT_ALL_ORDERS, &[])
            .await
            .map_err(|e| unavailable("lookup_all", e))?;

        rows.into_iter()
            .map(|row| {
                let key: String = row.try_get(0).map_err(|e| unavailable("lookup_all", e))?;
                let json: String = row.try_get(1).map_err(|e| unavailable("lookup_all", e))?;
                Ok((key, Bytes::from(json)))
            })
            .collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let conn = self.get_conn("ping").await?;
        conn.simple_query("SELECT 1")
            .await
            .map_err(|e| unavailable("ping", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DbConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.max_size, 16);
        assert!(config.dsn.is_none());
    }

    #[test]
    fn test_debug_redacts_dsn() {
        let config = DbConfig {
            dsn: Some("postgres://app:hunter2@db/orders".to_string()),
            ..Default::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_non_utf8_payload_is_rejected() {
        let err = payload_text("upsert", &Bytes::from_static(&[0xff, 0xfe])).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }

    #[test]
    fn test_reads_render_payload_as_text() {
        assert!(SELECT_ORDER.contains("order_json::text"));
        assert!(SELECT_ALL_ORDERS.contains("order_json::text"));
    }

    #[test]
    fn test_upsert_casts_only_for_jsonb_column() {
        assert_eq!(upsert_statement(false), UPSERT_ORDER);
        assert!(!UPSERT_ORDER.contains("jsonb"));
        assert_eq!(upsert_statement(true), UPSERT_ORDER_JSONB);
        assert!(UPSERT_ORDER_JSONB.contains("$2::text::jsonb"));
    }

    #[tokio::test]
    async fn test_create_pool_is_lazy() {
        // Pool creation does not connect, so an unreachable host still builds.
        let config = DbConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        };
        let client = DbClient::from_config(&config).unwrap();
        assert_eq!(client.pool_size(), 0);
    }
}
