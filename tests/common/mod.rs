//! Shared helpers for integration tests.

// Each test binary compiles this module separately and uses a subset of it.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use schedule_cache::{CacheManager, CategoryPolicy};

/// Manager with the production TTL policy and no capacity cap.
pub fn default_manager() -> Arc<CacheManager> {
    init_tracing();
    Arc::new(CacheManager::new(CategoryPolicy::default()))
}

/// Manager whose every category expires after `ttl`, for expiry tests that
/// cannot wait out real TTLs.
pub fn manager_with_ttl(ttl: Duration) -> Arc<CacheManager> {
    init_tracing();
    Arc::new(CacheManager::new(CategoryPolicy::new(ttl, ttl, ttl)))
}

/// A search term unlikely to collide across tests in one binary.
pub fn unique_term(prefix: &str) -> String {
    format!("{}-{}", prefix, rand::random::<u32>())
}

/// Install a test subscriber once per binary; respects `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
