//! Concurrent TTL store for cached query results.
//!
//! The store executes what [`CacheManager`](crate::CacheManager) instructs
//! plus lazy expiry checks on read; it has no policy of its own. Keys are
//! opaque strings. `DashMap` keeps operations on unrelated keys from
//! serializing behind a global lock.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::key_builder::Category;

/// A cached query result with its scoping and expiry metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached payload, replaced wholesale on every re-fetch.
    pub value: Value,
    /// Query category the entry was stored under.
    pub category: Category,
    /// Owning entity tag; empty for global data.
    pub group: String,
    /// When the entry was stored.
    pub created_at: Instant,
    /// `created_at + TTL(category)`; the entry is logically absent after this.
    pub expires_at: Instant,
    /// Approximate serialized size, computed once at insert.
    pub size_bytes: usize,
}

impl CacheEntry {
    /// Build an entry expiring `ttl` from now.
    #[must_use]
    pub fn new(value: Value, category: Category, group: String, ttl: Duration) -> Self {
        let created_at = Instant::now();
        let size_bytes = serde_json::to_vec(&value).map_or(0, |bytes| bytes.len());
        Self {
            value,
            category,
            group,
            created_at,
            expires_at: created_at + ttl,
            size_bytes,
        }
    }

    /// Whether the entry is logically absent at the real current time.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Whether the entry is logically absent at `now`.
    ///
    /// Taking the clock as an argument keeps sweep behavior testable without
    /// waiting out real TTLs.
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Metadata-only view of one entry, used for statistics.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub category: Category,
    pub group: String,
    pub size_bytes: usize,
    /// Expired but not yet swept; excluded from live counts.
    pub expired: bool,
}

/// Concurrent key -> [`CacheEntry`] map with lazy expiry.
#[derive(Debug, Default)]
pub struct CacheStore {
    map: DashMap<String, CacheEntry>,
    capacity: Option<usize>,
}

impl CacheStore {
    /// Create an unbounded store; growth is bounded only by TTL-driven sweep.
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
            capacity: None,
        }
    }

    /// Create a store that evicts soonest-to-expire entries instead of
    /// growing past `capacity`.
    #[must_use]
    pub fn with_capacity_cap(capacity: usize) -> Self {
        Self {
            map: DashMap::new(),
            capacity: Some(capacity),
        }
    }

    /// Fetch a live entry. An expired entry behaves as a miss and is removed
    /// eagerly, so memory stays bounded even without a background sweep.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.map.get(key)?;
        if entry.is_expired() {
            // Release the shard read lock before removing.
            drop(entry);
            self.map.remove(key);
            return None;
        }
        Some(entry.clone())
    }

    /// Insert or atomically replace the entry at `key`. Readers observe
    /// either the old entry or the new one, never a mix.
    pub fn insert(&self, key: String, entry: CacheEntry) {
        if let Some(capacity) = self.capacity {
            if !self.map.contains_key(&key) && self.map.len() >= capacity {
                let excess = self.map.len() + 1 - capacity;
                self.evict_soonest_to_expire(excess);
            }
        }
        self.map.insert(key, entry);
    }

    /// Remove one entry; returns whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.map.remove(key).is_some()
    }

    /// Remove every entry matching `predicate` in one pass over the map.
    /// Returns the number removed.
    pub fn delete_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&CacheEntry) -> bool,
    {
        let mut removed = 0;
        self.map.retain(|_, entry| {
            if predicate(entry) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Remove everything; returns the number of entries dropped.
    pub fn clear(&self) -> usize {
        let removed = self.map.len();
        self.map.clear();
        removed
    }

    /// Remove entries already expired at the real current time.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Remove entries expired as of `now`. Idempotent; a second call with the
    /// same clock removes nothing.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let removed = self.delete_where(|entry| entry.is_expired_at(now));
        if removed > 0 {
            debug!(count = removed, "swept expired entries");
        }
        removed
    }

    /// Metadata listing for statistics. Does not clone payloads.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        let now = Instant::now();
        self.map
            .iter()
            .map(|entry| EntrySnapshot {
                category: entry.category,
                group: entry.group.clone(),
                size_bytes: entry.size_bytes,
                expired: entry.is_expired_at(now),
            })
            .collect()
    }

    /// Number of physically stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn evict_soonest_to_expire(&self, count: usize) {
        let mut candidates: Vec<(String, Instant)> = self
            .map
            .iter()
            .map(|entry| (entry.key().clone(), entry.expires_at))
            .collect();
        candidates.sort_by_key(|(_, expires_at)| *expires_at);
        for (key, _) in candidates.into_iter().take(count) {
            self.map.remove(&key);
        }
        debug!(count, "evicted soonest-to-expire entries at capacity cap");
    }
}
