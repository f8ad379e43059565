//! Adapter traits for the durable store and the event feed.
//!
//! Both are consumed through trait objects so the engine is independent of
//! PostgreSQL and Kafka. Implementations must be safe to share across tasks.

use async_trait::async_trait;
use bytes::Bytes;
use ordercache_core::{OrderKey, StoreError, StreamError};

/// Durable, idempotent record store.
///
/// The store is the system of record. Payloads are kept byte-for-byte; no
/// schema transformation happens on the way in or out.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace the payload stored under `key`.
    ///
    /// Applying the same `(key, payload)` any number of times must leave
    /// exactly one entry equal to the latest write.
    async fn upsert(&self, key: &OrderKey, payload: &Bytes) -> Result<(), StoreError>;

    /// Fetch the payload stored under `key`, `Ok(None)` if there is none.
    async fn lookup_one(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Fetch every stored `(key, payload)` row.
    ///
    /// Keys are returned unvalidated so that malformed rows reach the caller
    /// and can be skipped individually.
    async fn lookup_all(&self) -> Result<Vec<(String, Bytes)>, StoreError>;

    /// Cheap connectivity check used by readiness probes.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Ordered-per-partition feed of serialized records.
///
/// Delivery is at-least-once; consumers must tolerate duplicates.
#[async_trait]
pub trait EventSource: Send {
    /// Wait for the next message payload.
    ///
    /// Returns `Ok(None)` once the source is exhausted and will never yield
    /// again. The returned future must be safe to drop mid-wait: the ingestion
    /// loop races it against cancellation.
    async fn next(&mut self) -> Result<Option<Bytes>, StreamError>;

    /// Release the subscription. Called once when the consumer stops.
    async fn close(&mut self);
}
