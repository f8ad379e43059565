//! Startup rehydration: bulk-load every stored record into the cache.

use std::sync::Arc;
use std::time::Duration;

use ordercache_core::{OrderRecord, StoreError};
use tracing::{info, warn};

use crate::cache::MaterializationCache;
use crate::traits::RecordStore;
use crate::with_store_timeout;

/// Outcome of a rehydration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RehydrateReport {
    /// Rows decoded and put into the cache.
    pub loaded: usize,
    /// Rows that failed to decode and were left out.
    pub skipped: usize,
}

impl RehydrateReport {
    pub fn total(&self) -> usize {
        self.loaded + self.skipped
    }
}

/// Fills a [`MaterializationCache`] from a [`RecordStore`].
///
/// Must complete before the service accepts reads. A store failure aborts the
/// whole pass; a single malformed row does not.
pub struct Rehydrator {
    store: Arc<dyn RecordStore>,
    cache: Arc<MaterializationCache>,
    timeout: Duration,
}

impl Rehydrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<MaterializationCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            timeout,
        }
    }

    pub async fn rehydrate(&self) -> Result<RehydrateReport, StoreError> {
        let rows = with_store_timeout("lookup_all", self.timeout, self.store.lookup_all()).await?;

        let mut report = RehydrateReport::default();
        for (key, payload) in rows {
            match OrderRecord::decode_persisted(&key, payload) {
                Ok(record) => {
                    self.cache.put(record);
                    report.loaded += 1;
                }
                Err(err) => {
                    warn!(order_uid = %key, error = %err, "Skipping corrupt stored order");
                    report.skipped += 1;
                }
            }
        }

        info!(
            loaded = report.loaded,
            skipped = report.skipped,
            "Cache rehydrated from store"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRecordStore;

    fn setup() -> (Arc<InMemoryRecordStore>, Arc<MaterializationCache>, Rehydrator) {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = Arc::new(MaterializationCache::new());
        let rehydrator = Rehydrator::new(store.clone(), cache.clone(), Duration::from_secs(5));
        (store, cache, rehydrator)
    }

    #[tokio::test]
    async fn test_empty_store_loads_nothing() {
        let (_store, cache, rehydrator) = setup();
        let report = rehydrator.rehydrate().await.unwrap();
        assert_eq!(report, RehydrateReport::default());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_loads_every_valid_row() {
        let (store, cache, rehydrator) = setup();
        store.insert_raw("k1", r#"{"order_uid":"k1","n":1}"#);
        store.insert_raw("k2", r#"{"order_uid":"k2","n":2}"#);

        let report = rehydrator.rehydrate().await.unwrap();
        assert_eq!(report.loaded, 2);
        assert_eq!(cache.keys().len(), 2);
        assert_eq!(
            cache.get("k2").unwrap().payload().as_ref(),
            br#"{"order_uid":"k2","n":2}"#
        );
    }

    #[tokio::test]
    async fn test_corrupt_rows_are_skipped() {
        let (store, cache, rehydrator) = setup();
        store.insert_raw("good", r#"{"order_uid":"good"}"#);
        store.insert_raw("broken", "{not json");
        store.insert_raw("moved", r#"{"order_uid":"elsewhere"}"#);

        let report = rehydrator.rehydrate().await.unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.total(), 3);
        assert!(cache.contains("good"));
        assert!(!cache.contains("broken"));
        assert!(!cache.contains("elsewhere"));
    }

    #[tokio::test]
    async fn test_store_failure_is_fatal() {
        let (store, cache, rehydrator) = setup();
        store.insert_raw("k1", r#"{"order_uid":"k1"}"#);
        store.set_available(false);

        assert!(rehydrator.rehydrate().await.is_err());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.set_latency(Duration::from_secs(60));
        let cache = Arc::new(MaterializationCache::new());
        let rehydrator = Rehydrator::new(store, cache, Duration::from_millis(100));

        let err = rehydrator.rehydrate().await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { operation: "lookup_all", .. }));
    }
}
