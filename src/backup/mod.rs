//! Periodic snapshotting of persistent state to a possibly-unavailable
//! destination.
//!
//! Each run probes the destination before touching it, verifies the snapshot
//! before promoting it, and records the outcome either way. Nothing in here
//! can block or fail the request-serving path; a broken mount costs one
//! skipped run and a log line, not an outage.

mod storage;

pub use storage::{LocalDirBackend, SnapshotSource, StorageBackend};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::error::BackupError;

/// ZIP local-file-header magic; every valid snapshot starts with it.
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];

/// Outcome of one scheduled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Succeeded,
    Failed,
    SkippedMountUnavailable,
}

/// Immutable record of one scheduled run.
#[derive(Debug, Clone, Serialize)]
pub struct BackupRecord {
    pub timestamp: DateTime<Utc>,
    /// Final artifact path; `None` unless the run succeeded.
    pub destination: Option<PathBuf>,
    pub status: BackupStatus,
    pub size_bytes: u64,
}

/// Scheduler configuration.
#[derive(Debug, Clone, Copy)]
pub struct BackupConfig {
    /// Time between runs.
    pub interval: Duration,
    /// Successful backups to retain; the most recent one is always kept.
    pub keep_count: usize,
    /// Run records to keep in memory.
    pub record_limit: usize,
}

impl Default for BackupConfig {
    /// Daily runs, five retained archives, last hundred records.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            keep_count: 5,
            record_limit: 100,
        }
    }
}

/// Runs snapshot backups on a fixed interval, independent of request traffic.
pub struct BackupScheduler {
    source: Arc<dyn SnapshotSource>,
    backend: Arc<dyn StorageBackend>,
    config: BackupConfig,
    records: RwLock<Vec<BackupRecord>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl BackupScheduler {
    #[must_use]
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        backend: Arc<dyn StorageBackend>,
        config: BackupConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            source,
            backend,
            config,
            records: RwLock::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// All retained run records, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<BackupRecord> {
        self.records.read().clone()
    }

    /// The most recent run record, if any run has happened.
    #[must_use]
    pub fn last_record(&self) -> Option<BackupRecord> {
        self.records.read().last().cloned()
    }

    /// Execute one run: probe, snapshot, verify, persist, rotate.
    ///
    /// Every failure mode is converted into a record; this never returns an
    /// error and never panics the caller.
    pub async fn run_once(&self) -> BackupRecord {
        let timestamp = Utc::now();
        let record = match self.try_backup(timestamp).await {
            Ok((destination, size_bytes)) => BackupRecord {
                timestamp,
                destination: Some(destination),
                status: BackupStatus::Succeeded,
                size_bytes,
            },
            Err(BackupError::MountUnavailable) => {
                warn!("backup destination unavailable, skipping run");
                BackupRecord {
                    timestamp,
                    destination: None,
                    status: BackupStatus::SkippedMountUnavailable,
                    size_bytes: 0,
                }
            }
            Err(err) => {
                error!(error = %err, "backup run failed");
                BackupRecord {
                    timestamp,
                    destination: None,
                    status: BackupStatus::Failed,
                    size_bytes: 0,
                }
            }
        };

        self.push_record(record.clone());

        if record.status == BackupStatus::Succeeded {
            if let Err(err) = self.apply_retention().await {
                // Rotation failure leaves extra backups around; the run
                // itself still succeeded.
                warn!(error = %err, "backup retention pass failed");
            }
        }

        record
    }

    /// Start the recurring job. The first run happens after one full
    /// interval; stop it with [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!(
                interval_secs = scheduler.config.interval.as_secs(),
                keep_count = scheduler.config.keep_count,
                "starting backup scheduler"
            );

            let mut ticker = tokio::time::interval(scheduler.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let record = scheduler.run_once().await;
                        info!(status = ?record.status, size_bytes = record.size_bytes, "backup run finished");
                    }
                    _ = shutdown_rx.recv() => {
                        info!("backup scheduler shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Signal the recurring job to stop after its current run.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    async fn try_backup(&self, timestamp: DateTime<Utc>) -> Result<(PathBuf, u64), BackupError> {
        if !self.backend.probe_health().await {
            return Err(BackupError::MountUnavailable);
        }

        let bytes = self
            .source
            .produce()
            .await
            .map_err(BackupError::SnapshotFailed)?;
        verify_snapshot(&bytes)?;

        let file_name = backup_file_name(timestamp);
        let destination = self.backend.persist(&file_name, &bytes).await?;
        info!(destination = %destination.display(), size_bytes = bytes.len(), "backup persisted");
        Ok((destination, bytes.len() as u64))
    }

    async fn apply_retention(&self) -> Result<usize, BackupError> {
        // Never delete the newest backup, whatever the configured count says.
        let keep = self.config.keep_count.max(1);
        let existing = self.backend.list().await?;
        if existing.len() <= keep {
            return Ok(0);
        }

        let excess = existing.len() - keep;
        for path in existing.iter().take(excess) {
            self.backend.delete(path).await?;
            info!(path = %path.display(), "rotated out old backup");
        }
        Ok(excess)
    }

    fn push_record(&self, record: BackupRecord) {
        let mut records = self.records.write();
        records.push(record);
        let len = records.len();
        if len > self.config.record_limit {
            records.drain(..len - self.config.record_limit);
        }
    }
}

/// Destination file name for a run: ISO-8601 timestamp, fixed extension.
fn backup_file_name(timestamp: DateTime<Utc>) -> String {
    let stamp = timestamp
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace(':', "");
    format!("schedule-backup-{stamp}.zip")
}

/// Reject empty or non-archive snapshots before they reach the destination.
fn verify_snapshot(bytes: &[u8]) -> Result<(), BackupError> {
    if bytes.is_empty() {
        return Err(BackupError::SnapshotCorrupt("snapshot is empty"));
    }
    if !bytes.starts_with(&ZIP_MAGIC) {
        return Err(BackupError::SnapshotCorrupt("missing zip archive header"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn verify_rejects_empty_snapshot() {
        assert!(matches!(
            verify_snapshot(b""),
            Err(BackupError::SnapshotCorrupt("snapshot is empty"))
        ));
    }

    #[test]
    fn verify_rejects_missing_header() {
        assert!(matches!(
            verify_snapshot(b"definitely not a zip"),
            Err(BackupError::SnapshotCorrupt("missing zip archive header"))
        ));
    }

    #[test]
    fn verify_accepts_zip_header() {
        assert!(verify_snapshot(b"PK\x03\x04rest-of-archive").is_ok());
    }

    #[test]
    fn file_name_is_timestamped_and_sortable() {
        let ts = Utc.with_ymd_and_hms(2025, 9, 1, 12, 30, 45).single().expect("valid ts");
        let name = backup_file_name(ts);
        assert_eq!(name, "schedule-backup-2025-09-01T123045.000Z.zip");

        let later = ts + chrono::Duration::seconds(1);
        assert!(backup_file_name(later) > name);
    }
}
