//! Error types for the cache and backup subsystems.
//!
//! Cache-path errors propagate to the caller unmodified; backup-path errors
//! stay inside the scheduler and surface only through records and logs.

use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by [`CacheManager`](crate::CacheManager) operations.
///
/// Cloneable so a single upstream failure can be delivered to every request
/// coalesced onto the same in-flight fetch.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The upstream schedule source failed or timed out.
    ///
    /// Fail-open: the failure is never cached and a later fetch for the same
    /// key starts fresh.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(Arc<anyhow::Error>),

    /// A group-scoped invalidation named an empty group.
    #[error("invalidation target must name a non-empty group")]
    InvalidInvalidationTarget,
}

impl CacheError {
    pub(crate) fn upstream(err: anyhow::Error) -> Self {
        Self::UpstreamUnavailable(Arc::new(err))
    }
}

/// Errors raised while producing or persisting a backup.
///
/// These never cross the scheduler boundary; each run converts them into a
/// [`BackupRecord`](crate::backup::BackupRecord) and keeps going.
#[derive(Debug, Error)]
pub enum BackupError {
    /// The destination mount failed its health probe; no snapshot was
    /// attempted.
    #[error("backup destination is unavailable")]
    MountUnavailable,

    /// The snapshot-producing collaborator failed.
    #[error("snapshot producer failed: {0}")]
    SnapshotFailed(anyhow::Error),

    /// The produced snapshot did not pass verification and was discarded.
    #[error("snapshot verification failed: {0}")]
    SnapshotCorrupt(&'static str),

    /// Filesystem error while writing, listing, or rotating backups.
    #[error("backup i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_error_is_cloneable_and_keeps_message() {
        let err = CacheError::upstream(anyhow::anyhow!("connection refused"));
        let cloned = err.clone();
        assert!(cloned.to_string().contains("connection refused"));
        assert!(cloned.to_string().starts_with("upstream unavailable"));
    }

    #[test]
    fn backup_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = BackupError::from(io);
        assert!(matches!(err, BackupError::Io(_)));
    }
}
