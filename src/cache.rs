//! Process-wide TTL memory cache
//!
//! A small `DashMap`-backed cache with per-entry expiry, used to keep
//! user-store lookups off the network for repeat logins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

/// Thread-safe string-keyed cache with TTL expiry
pub struct TtlCache<V> {
    entries: DashMap<String, Entry<V>>,
    default_ttl: Duration,
    stats: CacheStats,
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> Entry<V> {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

/// Counters updated on every lookup
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that found nothing or an expired entry
    pub misses: u64,
    /// Expired entries removed
    pub evictions: u64,
    /// Current number of entries
    pub size: usize,
}

impl CacheStatsSnapshot {
    /// Hit rate in `0.0..=1.0`
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl<V: Clone> TtlCache<V> {
    /// Create an empty cache whose entries live for `default_ttl`
    #[must_use]
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            stats: CacheStats::default(),
        }
    }

    /// Get a live entry.
    ///
    /// An expired entry is removed on the way out and counted as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let Some(entry) = self.entries.get(key) else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if entry.is_expired() {
            // the read guard must be released before removing
            drop(entry);
            self.entries.remove(key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value.clone())
    }

    /// Insert with the cache's default TTL
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    /// Insert with an explicit TTL, replacing any existing entry
    pub fn insert_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.entries.insert(
            key.into(),
            Entry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Drop all expired entries, returning how many were removed
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            self.stats
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            size: self.entries.len(),
        }
    }
}
