//! Backup store for the update executor
//!
//! Creates integrity-checked snapshots of files before mutation and restores
//! them on demand:
//! - Snapshot names are `<original-filename>_<timestamp>.backup`, unique per
//!   (original path, timestamp)
//! - A sha256 of the content is captured at backup time and re-verified
//!   before any restore; a mismatch aborts the restore instead of silently
//!   restoring corrupted content
//! - Restores write to a temp file and rename into place, so an in-flight
//!   restore never leaves a half-written original

#![warn(unreachable_pub)]
#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Backup store errors
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Source file missing at snapshot time
    #[error("source file not found: {0}")]
    SourceNotFound(PathBuf),

    /// Backup file missing at restore time
    #[error("backup file not found: {0}")]
    BackupNotFound(PathBuf),

    /// Backup content no longer matches the hash captured at snapshot time
    #[error("backup integrity check failed for {path}: expected {expected}, got {actual}")]
    IntegrityViolation {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Filesystem failure
    #[error("backup io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Snapshot metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupInfo {
    /// Path of the file that was snapshotted
    pub original_path: PathBuf,
    /// Where the snapshot lives
    pub backup_path: PathBuf,
    /// When the snapshot was taken
    pub created_at: DateTime<Utc>,
    /// Hex sha256 of the content at snapshot time
    pub content_hash: String,
}

/// Integrity-checked snapshot store
///
/// The backup directory is shared across concurrent file updates; snapshot
/// names never collide because each embeds the original filename plus a
/// timestamp, with a numeric suffix when two snapshots of the same file land
/// in the same second.
#[derive(Debug, Clone)]
pub struct BackupStore {
    directory: PathBuf,
}

impl BackupStore {
    /// Open a store rooted at `directory`, creating it if absent
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self, BackupError> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|source| BackupError::Io {
                path: directory.clone(),
                source,
            })?;
        Ok(Self { directory })
    }

    /// Backup directory path
    #[inline]
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Snapshot `original` and return its metadata
    pub async fn snapshot(&self, original: &Path) -> Result<BackupInfo, BackupError> {
        let content = match tokio::fs::read(original).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::SourceNotFound(original.to_path_buf()));
            }
            Err(source) => {
                return Err(BackupError::Io {
                    path: original.to_path_buf(),
                    source,
                });
            }
        };

        let created_at = Utc::now();
        let backup_path = self.unique_backup_path(original, created_at).await;

        tokio::fs::write(&backup_path, &content)
            .await
            .map_err(|source| BackupError::Io {
                path: backup_path.clone(),
                source,
            })?;

        let content_hash = hash_bytes(&content);
        tracing::debug!(original = %original.display(), backup = %backup_path.display(), "created backup");

        Ok(BackupInfo {
            original_path: original.to_path_buf(),
            backup_path,
            created_at,
            content_hash,
        })
    }

    /// Restore a snapshot over its original path
    ///
    /// Re-verifies the snapshot's hash first; on mismatch the original file
    /// is left untouched.
    pub async fn restore(&self, info: &BackupInfo) -> Result<(), BackupError> {
        let content = match tokio::fs::read(&info.backup_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::BackupNotFound(info.backup_path.clone()));
            }
            Err(source) => {
                return Err(BackupError::Io {
                    path: info.backup_path.clone(),
                    source,
                });
            }
        };

        let actual = hash_bytes(&content);
        if actual != info.content_hash {
            return Err(BackupError::IntegrityViolation {
                path: info.backup_path.clone(),
                expected: info.content_hash.clone(),
                actual,
            });
        }

        // Write-then-rename so the original is replaced atomically.
        let tmp_path = info.original_path.with_extension("kup-restore-tmp");
        tokio::fs::write(&tmp_path, &content)
            .await
            .map_err(|source| BackupError::Io {
                path: tmp_path.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp_path, &info.original_path)
            .await
            .map_err(|source| BackupError::Io {
                path: info.original_path.clone(),
                source,
            })?;

        tracing::info!(original = %info.original_path.display(), "restored from backup");
        Ok(())
    }

    /// Delete snapshots older than `retention_days`, returning how many were removed
    pub async fn prune_older_than(&self, retention_days: u64) -> Result<usize, BackupError> {
        let cutoff = std::time::SystemTime::now()
            - std::time::Duration::from_secs(retention_days * 24 * 3600);

        let mut entries =
            tokio::fs::read_dir(&self.directory)
                .await
                .map_err(|source| BackupError::Io {
                    path: self.directory.clone(),
                    source,
                })?;

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await.map_err(|source| BackupError::Io {
            path: self.directory.clone(),
            source,
        })? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "backup") {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let Ok(modified) = meta.modified() else {
                continue;
            };
            if modified < cutoff && tokio::fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, "pruned old backups");
        }
        Ok(removed)
    }

    /// Count snapshots currently on disk
    pub async fn snapshot_count(&self) -> usize {
        let Ok(mut entries) = tokio::fs::read_dir(&self.directory).await else {
            return 0;
        };
        let mut count = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.path().extension().is_some_and(|ext| ext == "backup") {
                count += 1;
            }
        }
        count
    }

    async fn unique_backup_path(&self, original: &Path, created_at: DateTime<Utc>) -> PathBuf {
        let file_name = original
            .file_name()
            .map_or_else(|| "unnamed".to_string(), |n| n.to_string_lossy().into_owned());
        let stamp = created_at.format("%Y%m%d_%H%M%S");

        let candidate = self.directory.join(format!("{file_name}_{stamp}.backup"));
        if !matches!(tokio::fs::try_exists(&candidate).await, Ok(true)) {
            return candidate;
        }
        for n in 1u32.. {
            let candidate = self
                .directory
                .join(format!("{file_name}_{stamp}_{n}.backup"));
            if !matches!(tokio::fs::try_exists(&candidate).await, Ok(true)) {
                return candidate;
            }
        }
        unreachable!("backup name space exhausted")
    }
}

/// Hex sha256 of a byte slice
#[inline]
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store_and_file(content: &str) -> (TempDir, BackupStore, PathBuf) {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::open(dir.path().join("backups")).await.unwrap();
        let file = dir.path().join("doc.md");
        tokio::fs::write(&file, content).await.unwrap();
        (dir, store, file)
    }

    #[tokio::test]
    async fn backup_round_trip_restores_exact_bytes() {
        let (_dir, store, file) = store_and_file("# original\ncontent\n").await;

        let info = store.snapshot(&file).await.unwrap();
        tokio::fs::write(&file, "mutated").await.unwrap();

        store.restore(&info).await.unwrap();

        let restored = tokio::fs::read(&file).await.unwrap();
        assert_eq!(restored, b"# original\ncontent\n");
        assert_eq!(hash_bytes(&restored), info.content_hash);
    }

    #[tokio::test]
    async fn snapshot_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::open(dir.path()).await.unwrap();

        let result = store.snapshot(&dir.path().join("nope.md")).await;
        assert!(matches!(result, Err(BackupError::SourceNotFound(_))));
    }

    #[tokio::test]
    async fn corrupted_backup_aborts_restore() {
        let (_dir, store, file) = store_and_file("good content").await;

        let info = store.snapshot(&file).await.unwrap();
        tokio::fs::write(&info.backup_path, "tampered").await.unwrap();
        tokio::fs::write(&file, "mutated").await.unwrap();

        let result = store.restore(&info).await;
        assert!(matches!(result, Err(BackupError::IntegrityViolation { .. })));

        // Original must be left untouched by the aborted restore.
        let current = tokio::fs::read_to_string(&file).await.unwrap();
        assert_eq!(current, "mutated");
    }

    #[tokio::test]
    async fn same_second_snapshots_get_distinct_names() {
        let (_dir, store, file) = store_and_file("content").await;

        let first = store.snapshot(&file).await.unwrap();
        let second = store.snapshot(&file).await.unwrap();

        assert_ne!(first.backup_path, second.backup_path);
        assert_eq!(store.snapshot_count().await, 2);
    }

    #[tokio::test]
    async fn prune_keeps_recent_snapshots() {
        let (_dir, store, file) = store_and_file("content").await;
        store.snapshot(&file).await.unwrap();

        let removed = store.prune_older_than(30).await.unwrap();
        assert_eq!(removed, 0);
        assert_eq!(store.snapshot_count().await, 1);
    }
}
