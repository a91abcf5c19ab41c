//! In-process hot tier
//!
//! Bounded concurrent map from scoped key to value with per-entry absolute
//! expiry. Entries expire lazily: an expired entry is removed and reported
//! absent on the next `get`. Backed by Moka for eviction and concurrency.

use moka::future::Cache;
use serde_json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Entry with its absolute expiry
#[derive(Debug, Clone)]
struct StoreEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

impl StoreEntry {
    fn new(value: serde_json::Value, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Snapshot of local tier counters
#[derive(Debug, Clone, Default)]
pub struct LocalStoreStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
}

/// Process-local key/value store with per-entry TTL and a size bound
pub struct LocalStore {
    cache: Cache<String, StoreEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
}

impl LocalStore {
    pub fn new(capacity: u64) -> Self {
        let cache: Cache<String, StoreEntry> = Cache::builder().max_capacity(capacity).build();
        Self {
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
        }
    }

    /// Get a live entry; expired entries are removed and reported absent
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        match self.cache.get(key).await {
            Some(entry) if entry.is_expired() => {
                self.cache.remove(key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert with a TTL. A zero TTL is a no-op: the entry would already be
    /// expired, and storing it would only delay the miss.
    pub async fn insert(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        if ttl.is_zero() {
            self.cache.remove(key).await;
            return;
        }
        self.cache
            .insert(key.to_string(), StoreEntry::new(value, ttl))
            .await;
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn remove(&self, key: &str) {
        self.cache.remove(key).await;
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.cache.invalidate_all();
        debug!("local store cleared");
    }

    /// Approximate entry count (pending evictions may lag)
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> LocalStoreStats {
        LocalStoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
        }
    }
}

/// Shared handle used across the orchestrator and the invalidation bus
pub type SharedLocalStore = Arc<LocalStore>;
