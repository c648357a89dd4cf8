//! Construction of a [`CacheSystem`] with explicit lifecycle.
//!
//! The embedding application builds one system at startup, hands the manager
//! to its request handlers, and calls [`CacheSystem::shutdown`] on the way
//! out. Nothing here is a global.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::cache_manager::{CacheManager, CategoryPolicy};
use crate::store::CacheStore;
use crate::{CacheSystem, sweeper};

/// Default sweep cadence, matching the upstream data's churn rate.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Builder for a [`CacheSystem`].
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use schedule_cache::{CacheSystemBuilder, CategoryPolicy};
///
/// #[tokio::main]
/// async fn main() {
///     let system = CacheSystemBuilder::new()
///         .with_policy(CategoryPolicy::default())
///         .with_capacity(50_000)
///         .with_sweep_interval(Duration::from_secs(120))
///         .build();
///
///     let manager = system.cache_manager();
///     // ... hand `manager` to request handlers ...
///     # let _ = manager;
///     system.shutdown().await;
/// }
/// ```
pub struct CacheSystemBuilder {
    policy: CategoryPolicy,
    capacity: Option<usize>,
    sweep_interval: Option<Duration>,
}

impl CacheSystemBuilder {
    /// Start from the default TTL policy, an unbounded store, and a
    /// five-minute sweep interval.
    #[must_use]
    pub fn new() -> Self {
        Self {
            policy: CategoryPolicy::default(),
            capacity: None,
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
        }
    }

    /// Override the per-category TTL policy.
    #[must_use]
    pub fn with_policy(mut self, policy: CategoryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Cap the store at `capacity` entries; soonest-to-expire entries are
    /// evicted to make room instead of rejecting writes.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Change how often the background sweep runs.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Disable the background sweeper; lazy expiry and manual
    /// [`CacheManager::sweep`] calls remain.
    #[must_use]
    pub fn without_sweeper(mut self) -> Self {
        self.sweep_interval = None;
        self
    }

    /// Build the system. Must run inside a tokio runtime when the sweeper is
    /// enabled.
    #[must_use]
    pub fn build(self) -> CacheSystem {
        let store = Arc::new(match self.capacity {
            Some(capacity) => CacheStore::with_capacity_cap(capacity),
            None => CacheStore::new(),
        });
        let manager = Arc::new(CacheManager::with_store(Arc::clone(&store), self.policy));

        let (shutdown_tx, _) = broadcast::channel(1);
        let sweeper = self
            .sweep_interval
            .map(|interval| sweeper::spawn(store, interval, shutdown_tx.subscribe()));

        CacheSystem {
            manager,
            shutdown_tx,
            sweeper,
        }
    }
}

impl Default for CacheSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}
