//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use ordercache_storage::{Ingestor, MaterializationCache, ReadThroughResolver, RecordStore};

use crate::config::EngineConfig;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// System of record. Used directly only by readiness probes.
    pub store: Arc<dyn RecordStore>,
    /// Materialization cache shared with the ingestion loop.
    pub cache: Arc<MaterializationCache>,
    /// Read path: cache first, store on miss.
    pub resolver: Arc<ReadThroughResolver>,
    /// Write path. Shares its counters with the background ingestion loop.
    pub ingestor: Ingestor,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<MaterializationCache>,
        resolver: Arc<ReadThroughResolver>,
        ingestor: Ingestor,
    ) -> Self {
        Self {
            store,
            cache,
            resolver,
            ingestor,
            start_time: Instant::now(),
        }
    }

    /// Wire an empty cache, the resolver and the ingestor around `store`.
    pub fn with_store(store: Arc<dyn RecordStore>, engine: &EngineConfig) -> Self {
        let cache = Arc::new(MaterializationCache::new());
        let resolver = Arc::new(ReadThroughResolver::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            engine.resolver.clone(),
        ));
        let ingestor = Ingestor::new(Arc::clone(&store), Arc::clone(&cache), engine.ingest.clone());
        Self::new(store, cache, resolver, ingestor)
    }
}

crate::impl_from_ref!(Arc<dyn RecordStore>, store);
crate::impl_from_ref!(Arc<MaterializationCache>, cache);
crate::impl_from_ref!(Arc<ReadThroughResolver>, resolver);
crate::impl_from_ref!(Ingestor, ingestor);
crate::impl_from_ref!(Instant, start_time);
