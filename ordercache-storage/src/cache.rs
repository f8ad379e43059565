//! Materialization cache.
//!
//! A concurrent key → record map that is the only mutable state shared between
//! the ingestion loop and request handlers. It is an explicit component owned
//! by whoever builds the service and handed out as `Arc<MaterializationCache>`.
//!
//! Entries live in a sharded map; every `get` and `put` runs inside a single
//! shard lock, so a reader sees either the previous record or the new one and
//! never a mix. Neither operation awaits. There is no eviction: the store can
//! always rebuild the cache, and the working set is expected to fit in memory.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ordercache_core::{OrderKey, OrderRecord};

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of writes (including overwrites).
    pub puts: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// In-process map from order key to the latest materialized record.
#[derive(Debug, Default)]
pub struct MaterializationCache {
    entries: DashMap<OrderKey, OrderRecord>,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
}

impl MaterializationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a record. Returns a clone; callers never hold references into
    /// the map.
    pub fn get(&self, key: &str) -> Option<OrderRecord> {
        match self.entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value().clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or overwrite the record under its key.
    ///
    /// Concurrent puts to one key resolve last-writer-wins in the order their
    /// shard locks were acquired.
    pub fn put(&self, record: OrderRecord) {
        self.entries.insert(record.key().clone(), record);
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    /// Insert the record only if its key is not cached yet, returning whichever
    /// record is cached afterwards.
    ///
    /// Read-through population uses this so a value loaded from the store
    /// never replaces one written by ingestion while the lookup was running.
    pub fn put_if_absent(&self, record: OrderRecord) -> OrderRecord {
        match self.entries.entry(record.key().clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                self.puts.fetch_add(1, Ordering::Relaxed);
                entry.insert(record).value().clone()
            }
        }
    }

    /// Presence check that does not count as a hit or miss.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the keys currently cached, in no particular order.
    pub fn keys(&self) -> Vec<OrderKey> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(key: &str, body: &str) -> OrderRecord {
        let json = format!(r#"{{"order_uid":"{}","body":"{}"}}"#, key, body);
        OrderRecord::decode(json.into_bytes()).unwrap()
    }

    #[test]
    fn test_get_missing_returns_none() {
        let cache = MaterializationCache::new();
        assert!(cache.get("nope").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_put_then_get() {
        let cache = MaterializationCache::new();
        let r = record("k1", "v1");
        cache.put(r.clone());
        assert_eq!(cache.get("k1"), Some(r));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_put_overwrites() {
        let cache = MaterializationCache::new();
        cache.put(record("k1", "old"));
        let newer = record("k1", "new");
        cache.put(newer.clone());
        assert_eq!(cache.get("k1"), Some(newer));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().puts, 2);
    }

    #[test]
    fn test_put_if_absent_keeps_existing_entry() {
        let cache = MaterializationCache::new();
        let first = record("k1", "first");
        assert_eq!(cache.put_if_absent(first.clone()), first);

        let winner = cache.put_if_absent(record("k1", "second"));
        assert_eq!(winner, first);
        assert_eq!(cache.get("k1"), Some(first));
        assert_eq!(cache.stats().puts, 1);
    }

    #[test]
    fn test_contains_does_not_touch_stats() {
        let cache = MaterializationCache::new();
        cache.put(record("k1", "v"));
        assert!(cache.contains("k1"));
        assert!(!cache.contains("k2"));
        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_concurrent_puts_same_key_never_tear() {
        let cache = Arc::new(MaterializationCache::new());
        let a = record("shared", &"a".repeat(512));
        let b = record("shared", &"b".repeat(512));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                let pick = if i % 2 == 0 { a.clone() } else { b.clone() };
                let (a, b) = (a.clone(), b.clone());
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        cache.put(pick.clone());
                        let seen = cache.get("shared").unwrap();
                        assert!(seen == a || seen == b);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 1);
    }
}
