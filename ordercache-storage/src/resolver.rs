//! Read-through resolution: cache first, store on miss.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ordercache_core::{OrderError, OrderRecord, OrderResult};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cache::MaterializationCache;
use crate::traits::RecordStore;
use crate::with_store_timeout;

/// Configuration for the read-through resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Upper bound for a store lookup on cache miss.
    pub store_timeout: Duration,
    /// Collapse concurrent misses for one key into a single store lookup.
    pub single_flight: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            single_flight: false,
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }
}

/// Where a resolved record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveSource {
    Cache,
    Store,
}

impl ResolveSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolveSource::Cache => "hit",
            ResolveSource::Store => "miss",
        }
    }
}

/// A resolved order with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOrder {
    pub record: OrderRecord,
    pub source: ResolveSource,
}

/// Answers reads from the cache, falling back to the store and populating the
/// cache with what it finds.
///
/// Records that fail to decode are never cached. A record loaded on a miss is
/// only cached if the key is still absent, so it never replaces one that
/// ingestion wrote during the lookup. Without single-flight, concurrent misses
/// for one key may each query the store.
pub struct ReadThroughResolver {
    store: Arc<dyn RecordStore>,
    cache: Arc<MaterializationCache>,
    config: ResolverConfig,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl ReadThroughResolver {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<MaterializationCache>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
            in_flight: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub async fn resolve(&self, key: &str) -> OrderResult<ResolvedOrder> {
        if key.trim().is_empty() {
            return Err(OrderError::not_found(key));
        }

        if let Some(record) = self.cache.get(key) {
            debug!(order_uid = key, "Cache hit");
            return Ok(ResolvedOrder {
                record,
                source: ResolveSource::Cache,
            });
        }
        debug!(order_uid = key, "Cache miss");

        if self.config.single_flight {
            self.resolve_single_flight(key).await
        } else {
            self.load_from_store(key).await
        }
    }

    async fn resolve_single_flight(&self, key: &str) -> OrderResult<ResolvedOrder> {
        let gate = self
            .in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        // Released on drop, so a request abandoned mid-lookup still clears it.
        let _in_flight = InFlightGuard {
            in_flight: &self.in_flight,
            key,
            gate: Arc::clone(&gate),
        };

        let _guard = gate.lock().await;
        // A leader may have populated the cache while we waited.
        match self.cache.get(key) {
            Some(record) => Ok(ResolvedOrder {
                record,
                source: ResolveSource::Cache,
            }),
            None => self.load_from_store(key).await,
        }
    }

    async fn load_from_store(&self, key: &str) -> OrderResult<ResolvedOrder> {
        let payload = with_store_timeout(
            "lookup_one",
            self.config.store_timeout,
            self.store.lookup_one(key),
        )
        .await
        .map_err(|err| {
            warn!(order_uid = key, error = %err, "Store lookup failed");
            err
        })?;

        let Some(payload) = payload else {
            return Err(OrderError::not_found(key));
        };

        let record = OrderRecord::decode_persisted(key, payload).map_err(|err| {
            warn!(order_uid = key, error = %err, "Stored order is corrupt");
            OrderError::corrupt(key, err)
        })?;

        // Ingestion may have cached a newer record while the lookup ran.
        let record = self.cache.put_if_absent(record);
        Ok(ResolvedOrder {
            record,
            source: ResolveSource::Store,
        })
    }
}

/// Removes a single-flight gate from the map when its holder finishes or is
/// dropped, unless a newer gate already replaced it.
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<String, Arc<Mutex<()>>>,
    key: &'a str,
    gate: Arc<Mutex<()>>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .remove_if(self.key, |_, current| Arc::ptr_eq(current, &self.gate));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{IngestConfig, Ingestor};
    use crate::memory::InMemoryRecordStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use ordercache_core::{ErrorKind, OrderKey, StoreError};
    use tokio::sync::Notify;

    /// Store whose `lookup_one` reads its row, then parks until released.
    struct StallingStore {
        inner: InMemoryRecordStore,
        read_done: Notify,
        release: Notify,
    }

    #[async_trait]
    impl RecordStore for StallingStore {
        async fn upsert(&self, key: &OrderKey, payload: &Bytes) -> Result<(), StoreError> {
            self.inner.upsert(key, payload).await
        }

        async fn lookup_one(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
            let row = self.inner.lookup_one(key).await;
            self.read_done.notify_one();
            self.release.notified().await;
            row
        }

        async fn lookup_all(&self) -> Result<Vec<(String, Bytes)>, StoreError> {
            self.inner.lookup_all().await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }
    }

    fn setup(config: ResolverConfig) -> (Arc<InMemoryRecordStore>, Arc<MaterializationCache>, ReadThroughResolver) {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = Arc::new(MaterializationCache::new());
        let resolver = ReadThroughResolver::new(store.clone(), cache.clone(), config);
        (store, cache, resolver)
    }

    #[tokio::test]
    async fn test_hit_skips_store() {
        let (store, cache, resolver) = setup(ResolverConfig::default());
        let record = OrderRecord::decode(&br#"{"order_uid":"k1"}"#[..]).unwrap();
        cache.put(record.clone());

        let resolved = resolver.resolve("k1").await.unwrap();
        assert_eq!(resolved.record, record);
        assert_eq!(resolved.source, ResolveSource::Cache);
        assert_eq!(store.lookup_one_calls(), 0);
    }

    #[tokio::test]
    async fn test_miss_populates_cache() {
        let (store, cache, resolver) = setup(ResolverConfig::default());
        store.insert_raw("k1", r#"{"order_uid":"k1"}"#);

        let first = resolver.resolve("k1").await.unwrap();
        assert_eq!(first.source, ResolveSource::Store);
        assert!(cache.contains("k1"));

        let second = resolver.resolve("k1").await.unwrap();
        assert_eq!(second.source, ResolveSource::Cache);
        assert_eq!(store.lookup_one_calls(), 1);
    }

    #[tokio::test]
    async fn test_absent_everywhere_is_not_found() {
        let (_store, cache, resolver) = setup(ResolverConfig::default());
        let err = resolver.resolve("ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_blank_key_is_not_found_without_lookup() {
        let (store, _cache, resolver) = setup(ResolverConfig::default());
        let err = resolver.resolve("  ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(store.lookup_one_calls(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_row_is_never_cached() {
        let (store, cache, resolver) = setup(ResolverConfig::default());
        store.insert_raw("bad", "{{{{");

        let err = resolver.resolve("bad").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptData);
        assert!(!cache.contains("bad"));
    }

    #[tokio::test]
    async fn test_store_outage_is_store_unavailable() {
        let (store, _cache, resolver) = setup(ResolverConfig::default());
        store.set_available(false);

        let err = resolver.resolve("k1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_lookup_times_out() {
        let (store, _cache, resolver) =
            setup(ResolverConfig::default().with_store_timeout(Duration::from_millis(20)));
        store.insert_raw("k1", r#"{"order_uid":"k1"}"#);
        store.set_latency(Duration::from_secs(5));

        let err = resolver.resolve("k1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_collapses_concurrent_misses() {
        let (store, _cache, resolver) =
            setup(ResolverConfig::default().with_single_flight(true));
        store.insert_raw("k1", r#"{"order_uid":"k1"}"#);
        store.set_latency(Duration::from_millis(50));
        let resolver = Arc::new(resolver);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                tokio::spawn(async move { resolver.resolve("k1").await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(store.lookup_one_calls(), 1);
        assert!(resolver.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_slow_miss_never_overwrites_newer_ingest() {
        let older = br#"{"order_uid":"k","rev":1}"#;
        let newer = br#"{"order_uid":"k","rev":2}"#;

        let store = Arc::new(StallingStore {
            inner: InMemoryRecordStore::new(),
            read_done: Notify::new(),
            release: Notify::new(),
        });
        store.inner.insert_raw("k", &older[..]);
        let cache = Arc::new(MaterializationCache::new());
        let resolver = Arc::new(ReadThroughResolver::new(
            store.clone(),
            cache.clone(),
            ResolverConfig::default(),
        ));
        let ingestor = Ingestor::new(store.clone(), cache.clone(), IngestConfig::default());

        let read = {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.resolve("k").await })
        };
        store.read_done.notified().await;

        ingestor.apply(Bytes::from_static(newer)).await.unwrap();
        store.release.notify_one();

        let resolved = read.await.unwrap().unwrap();
        assert_eq!(resolved.record.payload().as_ref(), &newer[..]);
        assert_eq!(cache.get("k").unwrap().payload().as_ref(), &newer[..]);
        assert_eq!(store.inner.get_raw("k"), Some(Bytes::from_static(newer)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_single_flight_releases_gate() {
        let (store, cache, resolver) =
            setup(ResolverConfig::default().with_single_flight(true));
        store.insert_raw("k1", r#"{"order_uid":"k1"}"#);
        store.set_latency(Duration::from_secs(5));
        let resolver = Arc::new(resolver);

        let handle = {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.resolve("k1").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(resolver.in_flight.len(), 1);

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert!(resolver.in_flight.is_empty());
        assert!(!cache.contains("k1"));
    }
}
