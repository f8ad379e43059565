//! ordercache Storage - Cache-Aside Materialization Engine
//!
//! Reconciles three data surfaces under concurrent access:
//!
//! - an event feed of serialized orders ([`EventSource`]),
//! - the durable store that is the system of record ([`RecordStore`]),
//! - the in-process [`MaterializationCache`] that serves reads.
//!
//! The [`Rehydrator`] fills the cache from the store at startup, the
//! [`Ingestor`] applies feed messages (persist first, then cache) and the
//! [`ReadThroughResolver`] answers reads, populating the cache on miss.
//! Concrete adapters for PostgreSQL and Kafka live in the API crate; the
//! in-memory ones in [`memory`] back the test suites.

pub mod cache;
pub mod ingest;
pub mod memory;
pub mod rehydrate;
pub mod resolver;
pub mod traits;

pub use cache::{CacheStats, MaterializationCache};
pub use ingest::{IngestConfig, IngestSnapshot, IngestStats, Ingestor};
pub use memory::{EventSender, InMemoryEventSource, InMemoryRecordStore};
pub use rehydrate::{RehydrateReport, Rehydrator};
pub use resolver::{ReadThroughResolver, ResolveSource, ResolvedOrder, ResolverConfig};
pub use traits::{EventSource, RecordStore};

use std::future::Future;
use std::time::Duration;

use ordercache_core::StoreError;

/// Bound a store call by `timeout`, mapping expiry to [`StoreError::Timeout`].
pub(crate) async fn with_store_timeout<T, F>(
    operation: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout { operation, timeout }),
    }
}
