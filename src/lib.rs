//! Schedule Cache
//!
//! Caching core for a service fronting a slow, rate-limited university
//! schedule source, featuring:
//! - **Cache-aside access**: on a miss the upstream collaborator is called
//!   and the result stored with a per-category TTL
//! - **Stampede protection**: concurrent misses on one key share a single
//!   in-flight upstream fetch (`DashMap` flight registry)
//! - **Group-scoped invalidation**: targeted removal of everything owned by
//!   one class group or lecturer, leaving unrelated data in place
//! - **Stale-entry accounting**: statistics distinguish live entries from
//!   expired ones awaiting sweep
//! - **Resilient backups**: a periodic snapshot job that probes its
//!   destination, verifies archives, and never blocks the serving path
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use schedule_cache::{CacheSystem, Category};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), schedule_cache::CacheError> {
//!     // One system per process, built at startup.
//!     let system = CacheSystem::new();
//!     let manager = system.cache_manager();
//!
//!     // Serve a schedule query; upstream is called only on a miss.
//!     let lessons = manager
//!         .get_or_fetch(Category::Schedule, &[("group", "ИВБО-01-20")], || async {
//!             // ... fetch from the schedule API ...
//!             Ok(serde_json::json!({"lessons": []}))
//!         })
//!         .await?;
//!     tracing::info!(%lessons, "served schedule");
//!
//!     // The group changed upstream: drop exactly its entries.
//!     let removed = manager.invalidate_group("ИВБО-01-20")?;
//!     tracing::info!(removed, "invalidated group");
//!
//!     let stats = manager.stats();
//!     tracing::info!(hit_rate = stats.schedule.hit_rate, "cache efficiency");
//!
//!     system.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Request → KeyBuilder → CacheStore ── hit ──→ value
//!                            │
//!                          miss → single-flight fetch → upstream → store + value
//!
//! BackupScheduler (own timer) → probe → snapshot → verify → rename → rotate
//! ```

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

pub mod backup;
pub mod builder;
pub mod cache_manager;
pub mod error;
pub mod key_builder;
pub mod store;

mod sweeper;

pub use backup::{
    BackupConfig, BackupRecord, BackupScheduler, BackupStatus, LocalDirBackend, SnapshotSource,
    StorageBackend,
};
pub use builder::CacheSystemBuilder;
pub use cache_manager::{CacheManager, CacheStats, CategoryPolicy, CategoryStats};
pub use error::{BackupError, CacheError};
pub use key_builder::{Category, QueryKey, build_key};
pub use store::{CacheEntry, CacheStore, EntrySnapshot};

// Re-export for implementors of SnapshotSource / StorageBackend.
pub use async_trait::async_trait;

/// The cache subsystem as one owned unit: the manager plus its background
/// sweeper, created at startup and torn down at shutdown.
pub struct CacheSystem {
    pub(crate) manager: Arc<CacheManager>,
    pub(crate) shutdown_tx: broadcast::Sender<()>,
    pub(crate) sweeper: Option<JoinHandle<()>>,
}

impl CacheSystem {
    /// Build a system with default policy (schedule/filter 30 min, search
    /// 10 min), an unbounded store, and a five-minute sweep.
    ///
    /// Must run inside a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        CacheSystemBuilder::new().build()
    }

    /// Builder for custom policy, capacity cap, or sweep cadence.
    #[must_use]
    pub fn builder() -> CacheSystemBuilder {
        CacheSystemBuilder::new()
    }

    /// The manager handling all cache operations. Clone the `Arc` into
    /// request handlers.
    #[must_use]
    pub fn cache_manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    /// Stop the background sweeper and wait for it to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.sweeper.take() {
            let _ = handle.await;
        }
        info!("cache system shut down");
    }
}

impl Default for CacheSystem {
    fn default() -> Self {
        Self::new()
    }
}
