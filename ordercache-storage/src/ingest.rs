//! Ingestion loop.
//!
//! Each message goes through WAIT → VALIDATE → PERSIST → CACHE:
//!
//! - WAIT blocks on the event source and is where cancellation is honored.
//! - VALIDATE decodes the payload; failures are logged and the message dropped.
//! - PERSIST upserts into the store; failures (including timeouts) are logged
//!   and the message dropped, optionally after a bounded number of retries.
//! - CACHE puts the record into the materialization cache. It cannot fail and
//!   never runs without a successful persist, so the cache stays a subset of
//!   what the store can rebuild.
//!
//! One worker processes messages strictly in delivery order, which is what
//! gives per-key ordering. Running several workers would need same-key
//! messages routed to the same worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ordercache_core::{OrderRecord, OrderResult, StoreError, StreamError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::MaterializationCache;
use crate::traits::{EventSource, RecordStore};
use crate::with_store_timeout;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the ingestion loop.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Upper bound for a single store upsert.
    pub store_timeout: Duration,
    /// Upper bound for waiting on the next message. `None` waits forever.
    pub stream_timeout: Option<Duration>,
    /// Pause after a stream error before waiting again.
    pub stream_error_backoff: Duration,
    /// Extra upsert attempts after the first failure. 0 drops immediately.
    pub persist_retries: u32,
    /// Base delay between upsert attempts; grows linearly per attempt.
    pub retry_backoff: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            stream_timeout: None,
            stream_error_backoff: Duration::from_millis(500),
            persist_retries: 0,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

impl IngestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_stream_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stream_timeout = timeout;
        self
    }

    pub fn with_stream_error_backoff(mut self, backoff: Duration) -> Self {
        self.stream_error_backoff = backoff;
        self
    }

    pub fn with_persist_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.persist_retries = retries;
        self.retry_backoff = backoff;
        self
    }
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Live ingestion counters.
///
/// `received` only counts messages taken from the event source; the other
/// counters also include payloads applied through [`Ingestor::apply`].
#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    applied: AtomicU64,
    invalid: AtomicU64,
    store_failures: AtomicU64,
    stream_errors: AtomicU64,
    retries: AtomicU64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSnapshot {
    pub received: u64,
    pub applied: u64,
    pub invalid: u64,
    pub store_failures: u64,
    pub stream_errors: u64,
    pub retries: u64,
}

impl IngestSnapshot {
    /// Messages that were discarded after validation or persistence failed.
    pub fn dropped(&self) -> u64 {
        self.invalid + self.store_failures
    }
}

// ============================================================================
// INGESTOR
// ============================================================================

/// Applies serialized orders to the store and then the cache.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn RecordStore>,
    cache: Arc<MaterializationCache>,
    config: IngestConfig,
    stats: Arc<IngestStats>,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<MaterializationCache>,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
            stats: Arc::new(IngestStats::default()),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn stats(&self) -> IngestSnapshot {
        self.stats.snapshot()
    }

    /// Run one VALIDATE → PERSIST → CACHE cycle for `payload`.
    ///
    /// This is also the inbound write path. On success the returned record is
    /// already visible in the cache.
    pub async fn apply(&self, payload: Bytes) -> OrderResult<OrderRecord> {
        self.apply_inner(payload, None).await
    }

    /// Consume `source` until it is exhausted or `cancel` fires.
    ///
    /// Per-message failures never stop the loop. The source is closed before
    /// returning, whatever the exit reason.
    pub async fn run<S>(&self, source: &mut S, cancel: CancellationToken) -> IngestSnapshot
    where
        S: EventSource + ?Sized,
    {
        info!("Ingestion loop started");

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Ingestion loop cancelled");
                    break;
                }
                next = self.next_message(source) => next,
            };

            match next {
                Ok(Some(payload)) => {
                    self.stats.received.fetch_add(1, Ordering::Relaxed);
                    match self.apply_inner(payload, Some(&cancel)).await {
                        Ok(record) => {
                            debug!(order_uid = %record.key(), bytes = record.len(), "Order materialized");
                        }
                        Err(err) => {
                            warn!(kind = err.kind().as_str(), error = %err, "Dropping message");
                        }
                    }
                }
                Ok(None) => {
                    info!("Event source exhausted");
                    break;
                }
                Err(err) => {
                    self.stats.stream_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %err, "Event stream error");
                    let backoff = self.config.stream_error_backoff;
                    if !backoff.is_zero() {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                info!("Ingestion loop cancelled");
                                break;
                            }
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                }
            }
        }

        source.close().await;

        let snapshot = self.stats();
        info!(
            received = snapshot.received,
            applied = snapshot.applied,
            dropped = snapshot.dropped(),
            stream_errors = snapshot.stream_errors,
            "Ingestion loop stopped"
        );
        snapshot
    }

    async fn next_message<S>(&self, source: &mut S) -> Result<Option<Bytes>, StreamError>
    where
        S: EventSource + ?Sized,
    {
        match self.config.stream_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, source.next()).await {
                Ok(result) => result,
                Err(_) => Err(StreamError::Timeout { timeout }),
            },
            None => source.next().await,
        }
    }

    async fn apply_inner(
        &self,
        payload: Bytes,
        cancel: Option<&CancellationToken>,
    ) -> OrderResult<OrderRecord> {
        let record = OrderRecord::decode(payload).map_err(|err| {
            self.stats.invalid.fetch_add(1, Ordering::Relaxed);
            err
        })?;

        self.persist(&record, cancel).await.map_err(|err| {
            self.stats.store_failures.fetch_add(1, Ordering::Relaxed);
            err
        })?;

        self.cache.put(record.clone());
        self.stats.applied.fetch_add(1, Ordering::Relaxed);
        Ok(record)
    }

    async fn persist(
        &self,
        record: &OrderRecord,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), StoreError> {
        let mut attempt: u32 = 0;
        loop {
            let result = with_store_timeout(
                "upsert",
                self.config.store_timeout,
                self.store.upsert(record.key(), record.payload()),
            )
            .await;

            let err = match result {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.config.persist_retries => err,
                Err(err) => return Err(err),
            };

            attempt += 1;
            self.stats.retries.fetch_add(1, Ordering::Relaxed);
            warn!(order_uid = %record.key(), attempt, error = %err, "Upsert failed, retrying");

            let delay = self.config.retry_backoff * attempt;
            match cancel {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(err),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryEventSource, InMemoryRecordStore};
    use ordercache_core::ErrorKind;

    fn setup(config: IngestConfig) -> (Arc<InMemoryRecordStore>, Arc<MaterializationCache>, Ingestor) {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = Arc::new(MaterializationCache::new());
        let ingestor = Ingestor::new(store.clone(), cache.clone(), config);
        (store, cache, ingestor)
    }

    fn order(key: &str) -> Bytes {
        Bytes::from(format!(r#"{{"order_uid":"{}","track_number":"T-{}"}}"#, key, key))
    }

    #[tokio::test]
    async fn test_apply_persists_then_caches() {
        let (store, cache, ingestor) = setup(IngestConfig::default());
        let record = ingestor.apply(order("k1")).await.unwrap();

        assert_eq!(store.get_raw("k1"), Some(order("k1")));
        assert_eq!(cache.get("k1"), Some(record));
        assert_eq!(ingestor.stats().applied, 1);
    }

    #[tokio::test]
    async fn test_apply_invalid_touches_nothing() {
        let (store, cache, ingestor) = setup(IngestConfig::default());
        let err = ingestor
            .apply(Bytes::from_static(br#"{"track_number":"x"}"#))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(store.upsert_calls(), 0);
        assert!(cache.is_empty());
        assert_eq!(ingestor.stats().invalid, 1);
    }

    #[tokio::test]
    async fn test_apply_store_failure_skips_cache() {
        let (store, cache, ingestor) = setup(IngestConfig::default());
        store.set_available(false);

        let err = ingestor.apply(order("k1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
        assert!(cache.get("k1").is_none());
        assert_eq!(store.upsert_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_is_an_ordinary_failure() {
        let (store, cache, ingestor) =
            setup(IngestConfig::default().with_store_timeout(Duration::from_millis(50)));
        store.set_latency(Duration::from_secs(10));

        let err = ingestor.apply(order("k1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_retry_gives_up() {
        let (store, cache, ingestor) = setup(
            IngestConfig::default().with_persist_retries(2, Duration::from_millis(10)),
        );
        store.set_available(false);

        assert!(ingestor.apply(order("k1")).await.is_err());
        assert_eq!(store.upsert_calls(), 3);
        assert_eq!(ingestor.stats().retries, 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_run_exits_when_source_exhausted() {
        let (store, cache, ingestor) = setup(IngestConfig::default());
        let mut source = InMemoryEventSource::from_messages(vec![order("a"), order("b")]);

        let snapshot = ingestor.run(&mut source, CancellationToken::new()).await;

        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.applied, 2);
        assert_eq!(store.len(), 2);
        assert_eq!(cache.len(), 2);
        assert!(source.is_closed());
    }

    #[tokio::test]
    async fn test_run_exits_on_cancel_and_closes_source() {
        let (_store, _cache, ingestor) = setup(IngestConfig::default());
        let (sender, mut source) = InMemoryEventSource::channel();
        let cancel = CancellationToken::new();

        let task = {
            let ingestor = ingestor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { ingestor.run(&mut source, cancel).await })
        };

        cancel.cancel();
        let snapshot = task.await.unwrap();
        assert_eq!(snapshot.received, 0);
        assert!(sender.subscription_closed());
    }

    #[tokio::test]
    async fn test_run_survives_stream_errors() {
        let (_store, cache, ingestor) =
            setup(IngestConfig::default().with_stream_error_backoff(Duration::ZERO));
        let mut source = InMemoryEventSource::from_deliveries(vec![
            Err(StreamError::Receive {
                reason: "broker restarting".to_string(),
            }),
            Ok(order("k1")),
        ]);

        let snapshot = ingestor.run(&mut source, CancellationToken::new()).await;
        assert_eq!(snapshot.stream_errors, 1);
        assert_eq!(snapshot.applied, 1);
        assert!(cache.contains("k1"));
    }

    #[test]
    fn test_ingest_config_builder() {
        let config = IngestConfig::new()
            .with_store_timeout(Duration::from_secs(1))
            .with_stream_timeout(Some(Duration::from_secs(30)))
            .with_stream_error_backoff(Duration::from_millis(10))
            .with_persist_retries(3, Duration::from_millis(25));

        assert_eq!(config.store_timeout, Duration::from_secs(1));
        assert_eq!(config.stream_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.stream_error_backoff, Duration::from_millis(10));
        assert_eq!(config.persist_retries, 3);
        assert_eq!(config.retry_backoff, Duration::from_millis(25));
    }
}
