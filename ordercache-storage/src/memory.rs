//! In-memory adapters for testing.
//!
//! [`InMemoryRecordStore`] counts calls per operation and can be switched
//! offline to simulate an unreachable database. [`InMemoryEventSource`] is a
//! scripted or channel-fed stand-in for the Kafka consumer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ordercache_core::{OrderKey, StoreError, StreamError};
use tokio::sync::mpsc;

use crate::traits::{EventSource, RecordStore};

// ============================================================================
// RECORD STORE
// ============================================================================

/// In-memory record store with call counting and fault injection.
#[derive(Debug)]
pub struct InMemoryRecordStore {
    rows: RwLock<HashMap<String, Bytes>>,
    available: AtomicBool,
    latency_ms: AtomicU64,
    upsert_calls: AtomicU64,
    lookup_one_calls: AtomicU64,
    lookup_all_calls: AtomicU64,
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRecordStore {
    /// Create an empty, available store.
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            upsert_calls: AtomicU64::new(0),
            lookup_one_calls: AtomicU64::new(0),
            lookup_all_calls: AtomicU64::new(0),
        }
    }

    /// Seed a row directly, bypassing validation. Used to plant malformed rows.
    pub fn insert_raw(&self, key: impl Into<String>, payload: impl Into<Bytes>) {
        self.write_rows().insert(key.into(), payload.into());
    }

    /// Read a row directly without counting a lookup.
    pub fn get_raw(&self, key: &str) -> Option<Bytes> {
        self.read_rows().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.read_rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_rows().is_empty()
    }

    /// Toggle availability. While unavailable every operation fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`, for timeout tests.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn upsert_calls(&self) -> u64 {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_one_calls(&self) -> u64 {
        self.lookup_one_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_all_calls(&self) -> u64 {
        self.lookup_all_calls.load(Ordering::SeqCst)
    }

    async fn simulate(&self) -> Result<(), StoreError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable {
                reason: "in-memory store switched offline".to_string(),
            })
        }
    }

    fn read_rows(&self) -> RwLockReadGuard<'_, HashMap<String, Bytes>> {
        self.rows.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_rows(&self) -> RwLockWriteGuard<'_, HashMap<String, Bytes>> {
        self.rows.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn upsert(&self, key: &OrderKey, payload: &Bytes) -> Result<(), StoreError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;
        self.write_rows()
            .insert(key.as_str().to_string(), payload.clone());
        Ok(())
    }

    async fn lookup_one(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        self.lookup_one_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;
        Ok(self.read_rows().get(key).cloned())
    }

    async fn lookup_all(&self) -> Result<Vec<(String, Bytes)>, StoreError> {
        self.lookup_all_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;
        Ok(self
            .read_rows()
            .iter()
            .map(|(key, payload)| (key.clone(), payload.clone()))
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.simulate().await
    }
}

// ============================================================================
// EVENT SOURCE
// ============================================================================

type Delivery = Result<Bytes, StreamError>;

/// Producer half of an [`InMemoryEventSource`].
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Delivery>,
    closed: Arc<AtomicBool>,
}

impl EventSender {
    /// Deliver a payload. Returns `false` once the consumer has gone away.
    pub fn send(&self, payload: impl Into<Bytes>) -> bool {
        self.tx.send(Ok(payload.into())).is_ok()
    }

    /// Deliver a transport error instead of a message.
    pub fn send_error(&self, error: StreamError) -> bool {
        self.tx.send(Err(error)).is_ok()
    }

    /// Whether the consumer has released its subscription.
    pub fn subscription_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Channel-backed event source.
///
/// Yields deliveries in send order and reports exhaustion (`Ok(None)`) once
/// every sender is dropped and the buffer is drained.
#[derive(Debug)]
pub struct InMemoryEventSource {
    rx: mpsc::UnboundedReceiver<Delivery>,
    closed: Arc<AtomicBool>,
}

impl InMemoryEventSource {
    /// Create a connected sender/source pair.
    pub fn channel() -> (EventSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let sender = EventSender {
            tx,
            closed: Arc::clone(&closed),
        };
        (sender, Self { rx, closed })
    }

    /// A finite, pre-scripted stream.
    pub fn from_deliveries<I>(deliveries: I) -> Self
    where
        I: IntoIterator<Item = Delivery>,
    {
        let (sender, source) = Self::channel();
        for delivery in deliveries {
            let _ = sender.tx.send(delivery);
        }
        source
    }

    /// A finite stream of payloads with no transport errors.
    pub fn from_messages<I, B>(messages: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self::from_deliveries(messages.into_iter().map(|m| Ok(m.into())))
    }

    /// Whether [`EventSource::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSource for InMemoryEventSource {
    async fn next(&mut self) -> Result<Option<Bytes>, StreamError> {
        match self.rx.recv().await {
            Some(Ok(payload)) => Ok(Some(payload)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.rx.close();
        self.closed.store(true, Ordering::SeqCst);
    }
}
