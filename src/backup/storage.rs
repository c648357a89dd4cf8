//! Storage backends and the snapshot collaborator seam.
//!
//! The scheduler talks to two capabilities: something that produces a
//! snapshot of the relational store, and somewhere to put it. Both are traits
//! so tests can run against a local directory and scripted fakes while
//! production mounts a network share.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tokio::fs;
use tracing::warn;

use crate::error::BackupError;

/// Produces a snapshot of persistent state as a ZIP archive.
///
/// Implemented by the relational-store collaborator; whatever consistent-read
/// mechanism it needs is its own concern.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Export the current state as archive bytes.
    async fn produce(&self) -> Result<Vec<u8>>;
}

/// A backup destination, possibly on an unreliable network mount.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Whether the destination is currently reachable and writable.
    async fn probe_health(&self) -> bool;

    /// Persist `bytes` under `file_name` in the destination.
    ///
    /// Implementations must never leave a partial artifact visible at the
    /// final path: write to a temporary location first, then rename.
    ///
    /// # Errors
    ///
    /// [`BackupError::Io`] when the write or rename fails.
    async fn persist(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, BackupError>;

    /// List existing backup artifacts, oldest first.
    ///
    /// # Errors
    ///
    /// [`BackupError::Io`] when the destination cannot be read.
    async fn list(&self) -> Result<Vec<PathBuf>, BackupError>;

    /// Delete one backup artifact.
    ///
    /// # Errors
    ///
    /// [`BackupError::Io`] when the delete fails.
    async fn delete(&self, path: &Path) -> Result<(), BackupError>;
}

/// Local-directory backend over `tokio::fs`.
///
/// Used directly in tests and as the building block for mount-backed
/// deployments, where the directory is the mount point.
#[derive(Debug, Clone)]
pub struct LocalDirBackend {
    dir: PathBuf,
}

impl LocalDirBackend {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl StorageBackend for LocalDirBackend {
    async fn probe_health(&self) -> bool {
        if fs::create_dir_all(&self.dir).await.is_err() {
            return false;
        }
        // A listing can succeed on a dead mount; an actual write cannot.
        let probe = self.dir.join(".probe");
        match fs::write(&probe, b"ok").await {
            Ok(()) => {
                let _ = fs::remove_file(&probe).await;
                true
            }
            Err(err) => {
                warn!(dir = %self.dir.display(), error = %err, "destination failed write probe");
                false
            }
        }
    }

    async fn persist(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, BackupError> {
        let final_path = self.dir.join(file_name);
        let temp_path = final_path.with_extension("tmp");

        fs::write(&temp_path, bytes).await?;
        if let Err(err) = fs::rename(&temp_path, &final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err.into());
        }
        Ok(final_path)
    }

    async fn list(&self) -> Result<Vec<PathBuf>, BackupError> {
        let mut backups = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(backups),
            Err(err) => return Err(err.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("zip") {
                backups.push(path);
            }
        }

        // Timestamped names sort chronologically.
        backups.sort();
        Ok(backups)
    }

    async fn delete(&self, path: &Path) -> Result<(), BackupError> {
        fs::remove_file(path).await.map_err(Into::into)
    }
}
