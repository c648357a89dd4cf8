//! Integration tests for the backup scheduler's resilience contract:
//! no corrupt backup is ever retained, and nothing here can block serving.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use schedule_cache::{
    BackupConfig, BackupError, BackupScheduler, BackupStatus, LocalDirBackend, SnapshotSource,
    StorageBackend, async_trait,
};
use tempfile::TempDir;

/// Snapshot producer scripted per test.
struct ScriptedSource {
    bytes: Vec<u8>,
    fail: bool,
    calls: AtomicU32,
}

impl ScriptedSource {
    fn ok(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            fail: false,
            calls: AtomicU32::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            bytes: Vec::new(),
            fail: true,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    async fn produce(&self) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("pg_dump exited with status 1");
        }
        Ok(self.bytes.clone())
    }
}

/// Local backend whose health probe can be forced down, standing in for a
/// flaky network mount.
struct FlakyMount {
    inner: LocalDirBackend,
    healthy: AtomicBool,
}

impl FlakyMount {
    fn new(dir: &Path, healthy: bool) -> Self {
        Self {
            inner: LocalDirBackend::new(dir),
            healthy: AtomicBool::new(healthy),
        }
    }
}

#[async_trait]
impl StorageBackend for FlakyMount {
    async fn probe_health(&self) -> bool {
        self.healthy.load(Ordering::SeqCst) && self.inner.probe_health().await
    }

    async fn persist(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, BackupError> {
        self.inner.persist(file_name, bytes).await
    }

    async fn list(&self) -> Result<Vec<PathBuf>, BackupError> {
        self.inner.list().await
    }

    async fn delete(&self, path: &Path) -> Result<(), BackupError> {
        self.inner.delete(path).await
    }
}

fn zip_bytes(payload: &[u8]) -> Vec<u8> {
    let mut bytes = b"PK\x03\x04".to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

fn visible_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(std::result::Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

fn make_scheduler(source: ScriptedSource, backend: impl StorageBackend + 'static, config: BackupConfig) -> BackupScheduler {
    BackupScheduler::new(Arc::new(source), Arc::new(backend), config)
}

#[tokio::test]
async fn successful_run_persists_a_timestamped_archive() {
    let dir = TempDir::new().expect("tempdir");
    let payload = zip_bytes(b"database_export.json + images");
    let scheduler = make_scheduler(
        ScriptedSource::ok(payload.clone()),
        LocalDirBackend::new(dir.path()),
        BackupConfig::default(),
    );

    let record = scheduler.run_once().await;

    assert_eq!(record.status, BackupStatus::Succeeded);
    assert_eq!(record.size_bytes, payload.len() as u64);
    let destination = record.destination.expect("succeeded run has a destination");
    assert!(destination.exists());
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    assert!(name.starts_with("schedule-backup-"));
    assert!(name.ends_with(".zip"));
    assert_eq!(visible_files(dir.path()).len(), 1);
}

#[tokio::test]
async fn unavailable_mount_skips_the_run_entirely() {
    let dir = TempDir::new().expect("tempdir");
    let source = Arc::new(ScriptedSource::ok(zip_bytes(b"unused")));
    let scheduler = BackupScheduler::new(
        Arc::clone(&source) as Arc<dyn SnapshotSource>,
        Arc::new(FlakyMount::new(dir.path(), false)),
        BackupConfig::default(),
    );

    let record = scheduler.run_once().await;

    assert_eq!(record.status, BackupStatus::SkippedMountUnavailable);
    assert!(record.destination.is_none());
    // No snapshot was even attempted and the destination gained no file.
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    assert!(visible_files(dir.path()).is_empty());
}

#[tokio::test]
async fn corrupt_snapshot_never_reaches_the_destination() {
    let dir = TempDir::new().expect("tempdir");
    let scheduler = make_scheduler(
        ScriptedSource::ok(b"not an archive at all".to_vec()),
        LocalDirBackend::new(dir.path()),
        BackupConfig::default(),
    );

    let record = scheduler.run_once().await;

    assert_eq!(record.status, BackupStatus::Failed);
    // Neither a final artifact nor a stray temp file is visible.
    assert!(visible_files(dir.path()).is_empty());
}

#[tokio::test]
async fn snapshot_producer_failure_is_recorded_not_raised() {
    let dir = TempDir::new().expect("tempdir");
    let scheduler = make_scheduler(
        ScriptedSource::failing(),
        LocalDirBackend::new(dir.path()),
        BackupConfig::default(),
    );

    let record = scheduler.run_once().await;

    assert_eq!(record.status, BackupStatus::Failed);
    assert!(visible_files(dir.path()).is_empty());
    assert_eq!(scheduler.records().len(), 1);
}

#[tokio::test]
async fn retention_keeps_only_the_newest_backups() {
    let dir = TempDir::new().expect("tempdir");
    let config = BackupConfig {
        keep_count: 2,
        ..BackupConfig::default()
    };
    let scheduler = make_scheduler(
        ScriptedSource::ok(zip_bytes(b"export")),
        LocalDirBackend::new(dir.path()),
        config,
    );

    let mut destinations = Vec::new();
    for _ in 0..4 {
        let record = scheduler.run_once().await;
        assert_eq!(record.status, BackupStatus::Succeeded);
        destinations.push(record.destination.expect("destination"));
        // Distinct millisecond timestamps keep file names unique.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let remaining = visible_files(dir.path());
    assert_eq!(remaining.len(), 2);
    for destination in destinations.iter().rev().take(2) {
        assert!(destination.exists(), "newest backups must survive rotation");
    }
    for destination in destinations.iter().take(2) {
        assert!(!destination.exists(), "oldest backups must be rotated out");
    }
}

#[tokio::test]
async fn most_recent_backup_survives_even_a_zero_keep_count() {
    let dir = TempDir::new().expect("tempdir");
    let config = BackupConfig {
        keep_count: 0,
        ..BackupConfig::default()
    };
    let scheduler = make_scheduler(
        ScriptedSource::ok(zip_bytes(b"export")),
        LocalDirBackend::new(dir.path()),
        config,
    );

    scheduler.run_once().await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let last = scheduler.run_once().await;

    let remaining = visible_files(dir.path());
    assert_eq!(remaining.len(), 1);
    assert!(last.destination.expect("destination").exists());
}

#[tokio::test]
async fn record_log_is_bounded() {
    let dir = TempDir::new().expect("tempdir");
    let config = BackupConfig {
        record_limit: 3,
        ..BackupConfig::default()
    };
    let scheduler = make_scheduler(
        ScriptedSource::failing(),
        LocalDirBackend::new(dir.path()),
        config,
    );

    for _ in 0..5 {
        scheduler.run_once().await;
    }

    assert_eq!(scheduler.records().len(), 3);
    let last = scheduler.last_record().expect("records exist");
    assert_eq!(last.status, BackupStatus::Failed);
}

#[tokio::test]
async fn scheduler_loop_runs_and_shuts_down() {
    let dir = TempDir::new().expect("tempdir");
    let config = BackupConfig {
        interval: Duration::from_millis(50),
        ..BackupConfig::default()
    };
    let scheduler = Arc::new(BackupScheduler::new(
        Arc::new(ScriptedSource::ok(zip_bytes(b"export"))),
        Arc::new(LocalDirBackend::new(dir.path())),
        config,
    ));

    let handle = scheduler.start();
    tokio::time::sleep(Duration::from_millis(130)).await;
    scheduler.shutdown();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("scheduler should exit promptly on shutdown")
        .expect("scheduler task should not panic");

    assert!(!scheduler.records().is_empty());
    assert!(!visible_files(dir.path()).is_empty());
}
