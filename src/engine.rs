//! Backup engine.
//!
//! [`BackupManager`] runs the per-directory pipeline (archive, optionally
//! encrypt, upload), lists stored backups newest first and applies the
//! retention policy. A failing directory never stops the others; every
//! terminal state is reported to the notification sink.

use crate::archive::{ArchiveAdapter, ArchiveReport};
use crate::config::Config;
use crate::keys::KeyScheme;
use crate::notify::NotificationSink;
use crate::storage::{StorageBackend, UploadResult};
use crate::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use tracing::{debug, error, info, warn};

/// Pipeline step a target failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Archiving,
    Encrypting,
    Uploading,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Archiving => write!(f, "archiving"),
            PipelineStage::Encrypting => write!(f, "encrypting"),
            PipelineStage::Uploading => write!(f, "uploading"),
        }
    }
}

/// A failed target, with the counts gathered before the failure
#[derive(Debug)]
struct PipelineFailure {
    stage: PipelineStage,
    total_dirs: usize,
    total_files: usize,
    error: Error,
}

impl PipelineFailure {
    fn new(stage: PipelineStage, error: Error) -> Self {
        Self {
            stage,
            total_dirs: 0,
            total_files: 0,
            error,
        }
    }
}

/// Outcome of one backup run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupSummary {
    /// Targets uploaded, with the key each was stored under
    pub succeeded: Vec<(PathBuf, String)>,
    /// Targets that failed, with the step they failed in
    pub failed: Vec<(PathBuf, PipelineStage)>,
}

impl BackupSummary {
    /// True when there were targets and none of them made it
    pub fn all_failed(&self) -> bool {
        self.succeeded.is_empty() && !self.failed.is_empty()
    }
}

/// Outcome of one retention pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    /// Timestamps kept by the retention policy
    pub retained: Vec<String>,
    /// Timestamps deleted
    pub deleted: Vec<String>,
    /// Timestamps selected for deletion that could not be deleted
    pub failed: Vec<String>,
}

/// Orchestrates backups, listings and retention for one host
pub struct BackupManager {
    config: Arc<Config>,
    keys: KeyScheme,
    storage: Arc<dyn StorageBackend>,
    archiver: Arc<dyn ArchiveAdapter>,
    notifier: Arc<dyn NotificationSink>,
}

impl BackupManager {
    /// Create a manager over an already initialized storage session
    pub fn new(
        config: Arc<Config>,
        storage: Arc<dyn StorageBackend>,
        archiver: Arc<dyn ArchiveAdapter>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let keys = config.key_scheme();
        Self {
            config,
            keys,
            storage,
            archiver,
            notifier,
        }
    }

    /// Back up every configured directory in order.
    ///
    /// Per-directory failures are reported and recorded in the summary; an
    /// error is returned only if the run could not start at all.
    pub async fn backup(&self) -> Result<BackupSummary> {
        let backup = &self.config.backup;
        info!(
            "Starting backup of {} directories to {}",
            backup.dirs.len(),
            self.storage.name()
        );

        let mut summary = BackupSummary::default();
        for dir in &backup.dirs {
            info!("Processing path {}", dir.display());

            let outcome = if backup.archive_dirs {
                self.archived_backup(dir).await
            } else {
                self.unarchived_backup(dir).await
            };

            match outcome {
                Ok(result) => {
                    for (path, reason) in &result.failed_files {
                        warn!("Skipped {}: {}", path.display(), reason);
                    }
                    info!(
                        "Backed up {} as {} ({}/{} files)",
                        dir.display(),
                        result.base_key,
                        result.success_files,
                        result.total_files
                    );
                    self.notifier
                        .notify_backup_success(
                            dir,
                            result.total_dirs,
                            result.total_files,
                            result.success_files,
                            &result.base_key,
                        )
                        .await;
                    summary.succeeded.push((dir.clone(), result.base_key));
                }
                Err(failure) => {
                    error!(
                        "Backup of {} failed while {}: {}",
                        dir.display(),
                        failure.stage,
                        failure.error
                    );
                    self.notifier
                        .notify_backup_failure(
                            dir,
                            failure.total_dirs,
                            failure.total_files,
                            &failure.error,
                        )
                        .await;
                    summary.failed.push((dir.clone(), failure.stage));
                }
            }
        }

        info!(
            "Backup finished: {} succeeded, {} failed",
            summary.succeeded.len(),
            summary.failed.len()
        );
        Ok(summary)
    }

    async fn archived_backup(&self, dir: &Path) -> std::result::Result<UploadResult, PipelineFailure> {
        debug!("Archiving {}", dir.display());
        let ArchiveReport {
            archive,
            total_files,
            total_dirs,
            success_files,
            failed_files,
        } = self
            .archiver
            .archive_directory(dir)
            .await
            .map_err(|e| PipelineFailure::new(PipelineStage::Archiving, e))?;

        let fail = |stage: PipelineStage, error: Error| PipelineFailure {
            stage,
            total_dirs,
            total_files,
            error,
        };

        if success_files == 0 {
            remove_quietly(archive);
            return Err(fail(PipelineStage::Archiving, Error::NoProcessableFiles));
        }

        let encryption = &self.config.backup.encryption;
        let upload_path = if encryption.enabled {
            debug!("Encrypting archive of {}", dir.display());
            self.archiver
                .fetch_public_key(&encryption.gpg.key_id, &encryption.gpg.key_server)
                .await
                .map_err(|e| fail(PipelineStage::Encrypting, e))?;
            let encrypted = self
                .archiver
                .encrypt_file(&archive)
                .await
                .map_err(|e| fail(PipelineStage::Encrypting, e))?;
            // Plaintext must be gone before the upload starts
            remove_quietly(archive);
            encrypted
        } else {
            archive
        };

        debug!("Uploading {}", upload_path.display());
        let base_key = self
            .storage
            .upload_file(&upload_path)
            .await
            .map_err(|e| fail(PipelineStage::Uploading, e))?;
        remove_quietly(upload_path);

        Ok(UploadResult {
            base_key,
            total_files,
            total_dirs,
            success_files,
            failed_files,
        })
    }

    async fn unarchived_backup(&self, dir: &Path) -> std::result::Result<UploadResult, PipelineFailure> {
        debug!("Uploading directory {}", dir.display());
        self.storage.upload_directory(dir).await.map_err(|e| {
            let (total_dirs, total_files) = match &e {
                Error::Upload {
                    total_dirs,
                    total_files,
                    ..
                } => (*total_dirs, *total_files),
                _ => (0, 0),
            };
            PipelineFailure {
                stage: PipelineStage::Uploading,
                total_dirs,
                total_files,
                error: e,
            }
        })
    }

    /// Timestamp segments of this host's backups, newest first
    pub async fn list_backups(&self) -> Result<Vec<String>> {
        let keys = self.storage.list().await.map_err(|e| {
            error!("Failed to list backups: {}", e);
            e
        })?;

        if keys.is_empty() {
            info!("No backups found under {}", self.keys.root_key());
            return Ok(Vec::new());
        }

        let mut timestamps = self.keys.sort_descending(self.storage.strip_prefix(&keys));
        timestamps.dedup();
        debug!("Found {} backups", timestamps.len());
        Ok(timestamps)
    }

    /// Delete every backup beyond the newest `retention-count`.
    ///
    /// Deletion failures are reported and do not stop the pass.
    pub async fn purge_old_backups(&self) -> Result<PurgeSummary> {
        let timestamps = self.list_backups().await?;
        let retention = self.config.backup.retention_count as usize;

        if timestamps.len() <= retention {
            info!(
                "No backups to purge ({} stored, keeping {})",
                timestamps.len(),
                retention
            );
            return Ok(PurgeSummary {
                retained: timestamps,
                ..Default::default()
            });
        }

        let mut summary = PurgeSummary::default();
        let (retained, expired) = timestamps.split_at(retention);
        summary.retained = retained.to_vec();
        info!("Deleting {} backups beyond the newest {}", expired.len(), retention);

        for timestamp in expired {
            info!("Deleting backup {}", self.keys.join(timestamp));
            match self.storage.delete(timestamp).await {
                Ok(()) => summary.deleted.push(timestamp.clone()),
                Err(e) => {
                    error!("Failed to delete backup {}: {}", timestamp, e);
                    self.notifier.notify_backup_delete_failure(timestamp, &e).await;
                    summary.failed.push(timestamp.clone());
                }
            }
        }

        info!(
            "Purge finished: {} deleted, {} failed",
            summary.deleted.len(),
            summary.failed.len()
        );
        Ok(summary)
    }
}

fn remove_quietly(path: TempPath) {
    let shown = path.display().to_string();
    if let Err(e) = path.close() {
        debug!("Failed to remove {}: {}", shown, e);
    }
}
