//! Cache-aside orchestration with single-flight stampede protection.
//!
//! On a miss, the fetch runs in a detached task registered per key; every
//! concurrent caller for that key awaits the same shared result instead of
//! issuing its own upstream call. A caller that stops waiting does not cancel
//! the fetch, so the cache still gets populated for the next request.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::key_builder::{self, Category, QueryKey};
use crate::store::{CacheEntry, CacheStore};

type FetchResult = Result<Value, CacheError>;
type SharedFlight = Shared<BoxFuture<'static, FetchResult>>;

/// Unregisters a flight once its fetch task finishes, even on panic.
struct FlightGuard {
    flights: Arc<DashMap<String, SharedFlight>>,
    key: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.flights.remove(&self.key);
    }
}

/// Per-category TTL policy, fixed for the process lifetime.
#[derive(Debug, Clone, Copy)]
pub struct CategoryPolicy {
    schedule_ttl: Duration,
    search_ttl: Duration,
    filter_ttl: Duration,
}

impl CategoryPolicy {
    #[must_use]
    pub fn new(schedule_ttl: Duration, search_ttl: Duration, filter_ttl: Duration) -> Self {
        Self {
            schedule_ttl,
            search_ttl,
            filter_ttl,
        }
    }

    /// TTL applied to entries of `category`.
    #[must_use]
    pub fn ttl(&self, category: Category) -> Duration {
        match category {
            Category::Schedule => self.schedule_ttl,
            Category::Search => self.search_ttl,
            Category::FilterOptions => self.filter_ttl,
        }
    }
}

impl Default for CategoryPolicy {
    /// Schedule 30 min, search 10 min, filter options 30 min.
    fn default() -> Self {
        Self {
            schedule_ttl: Duration::from_secs(1800),
            search_ttl: Duration::from_secs(600),
            filter_ttl: Duration::from_secs(1800),
        }
    }
}

/// Orchestrates cache-aside access, invalidation, and statistics.
///
/// Constructed once at startup and handed to request handlers; there is no
/// process-wide instance.
pub struct CacheManager {
    store: Arc<CacheStore>,
    policy: CategoryPolicy,
    hits: [AtomicU64; 3],
    misses: [AtomicU64; 3],
    /// In-flight fetches, one per key, shared by all coalesced callers.
    flights: Arc<DashMap<String, SharedFlight>>,
}

impl CacheManager {
    /// Create a manager over an unbounded store.
    #[must_use]
    pub fn new(policy: CategoryPolicy) -> Self {
        Self::with_store(Arc::new(CacheStore::new()), policy)
    }

    pub(crate) fn with_store(store: Arc<CacheStore>, policy: CategoryPolicy) -> Self {
        Self {
            store,
            policy,
            hits: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            misses: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            flights: Arc::new(DashMap::new()),
        }
    }

    pub(crate) fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Serve a logical query from cache, fetching upstream on a miss.
    ///
    /// On a hit the cached value is returned as-is. On a miss, `fetch_fn`
    /// runs at most once across all concurrent callers of the same key; its
    /// result (value or error) is delivered to every waiter. A successful
    /// fetch is stored with the category's TTL and the query's group tag; a
    /// failed fetch is never cached.
    ///
    /// # Errors
    ///
    /// [`CacheError::UpstreamUnavailable`] when the upstream fetch fails.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        category: Category,
        params: &[(&str, &str)],
        fetch_fn: F,
    ) -> Result<Value, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let QueryKey { key, group } = key_builder::build_key(category, params);

        if let Some(entry) = self.store.get(&key) {
            self.hits[category.index()].fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "cache hit");
            return Ok(entry.value);
        }

        self.misses[category.index()].fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "cache miss");

        // The entry guard holds the shard lock, so a finished flight cannot
        // unregister itself between our lookup and insert.
        let flight = match self.flights.entry(key.clone()) {
            Entry::Occupied(occupied) => occupied.get().clone(),
            Entry::Vacant(vacant) => {
                let flight = self.spawn_flight(category, key, group, fetch_fn);
                vacant.insert(flight.clone());
                flight
            }
        };

        flight.await
    }

    /// Remove every entry across all categories. Hit/miss counters are not
    /// touched; they measure cumulative efficiency, not current occupancy.
    pub fn invalidate_all(&self) -> usize {
        let removed = self.store.clear();
        info!(removed, "cache fully invalidated");
        removed
    }

    /// Remove every entry scoped to `group`, across all categories.
    ///
    /// The target is normalized exactly like query parameters, so any
    /// spelling that would have produced the entry also invalidates it.
    /// Entries with an empty group (global data) are never matched.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidInvalidationTarget`] when `group` is empty or
    /// whitespace.
    pub fn invalidate_group(&self, group: &str) -> Result<usize, CacheError> {
        let target = key_builder::normalize_value(group);
        if target.is_empty() {
            return Err(CacheError::InvalidInvalidationTarget);
        }

        let removed = self
            .store
            .delete_where(|entry| !entry.group.is_empty() && entry.group == target);
        info!(group = %target, removed, "group invalidated");
        Ok(removed)
    }

    /// Remove entries whose TTL has elapsed; callable from a timer or a test.
    pub fn sweep(&self) -> usize {
        self.store.sweep()
    }

    /// Statistics computed from a live store snapshot plus the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let snapshot = self.store.snapshot();
        let mut live = [0_usize; 3];
        let mut size_bytes = 0_usize;
        let mut expired = 0_usize;

        for entry in &snapshot {
            if entry.expired {
                expired += 1;
                continue;
            }
            live[entry.category.index()] += 1;
            size_bytes += entry.size_bytes;
        }

        let per_category = |category: Category| {
            let hits = self.hits[category.index()].load(Ordering::Relaxed);
            let misses = self.misses[category.index()].load(Ordering::Relaxed);
            CategoryStats {
                entries: live[category.index()],
                hits,
                misses,
                hit_rate: hit_rate(hits, misses),
            }
        };

        CacheStats {
            schedule: per_category(Category::Schedule),
            search: per_category(Category::Search),
            filter_options: per_category(Category::FilterOptions),
            total_entries: live.iter().sum(),
            expired_entries: expired,
            approx_size_bytes: size_bytes,
        }
    }

    fn spawn_flight<F, Fut>(
        &self,
        category: Category,
        key: String,
        group: String,
        fetch_fn: F,
    ) -> SharedFlight
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<FetchResult>();
        let store = Arc::clone(&self.store);
        let flights = Arc::clone(&self.flights);
        let ttl = self.policy.ttl(category);

        tokio::spawn(async move {
            // Declared first so it drops last: the flight stays registered
            // until after the result has been sent.
            let _guard = FlightGuard {
                flights,
                key: key.clone(),
            };

            // A flight that just completed may have populated the store
            // between the caller's miss and this task starting.
            let result = if let Some(entry) = store.get(&key) {
                Ok(entry.value)
            } else {
                match fetch_fn().await {
                    Ok(value) => {
                        store.insert(
                            key.clone(),
                            CacheEntry::new(value.clone(), category, group, ttl),
                        );
                        debug!(key = %key, ttl_secs = ttl.as_secs(), "stored upstream result");
                        Ok(value)
                    }
                    Err(err) => {
                        warn!(key = %key, error = %err, "upstream fetch failed");
                        Err(CacheError::upstream(err))
                    }
                }
            };

            // Every waiter may already be gone; the store is populated either
            // way, which is all the next caller needs.
            let _ = tx.send(result);
        });

        async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(CacheError::upstream(anyhow::anyhow!(
                    "fetch task aborted before completing"
                ))),
            }
        }
        .boxed()
        .shared()
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Counters and live occupancy for one category.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryStats {
    /// Live (unexpired) entries currently stored.
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 when no requests were served yet.
    pub hit_rate: f64,
}

/// Aggregate cache statistics, safe to hand to the routing layer verbatim.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub schedule: CategoryStats,
    pub search: CategoryStats,
    pub filter_options: CategoryStats,
    /// Live entries across all categories.
    pub total_entries: usize,
    /// Expired entries still occupying memory until the next sweep.
    pub expired_entries: usize,
    /// Approximate serialized size of all live entries.
    pub approx_size_bytes: usize,
}
