//! Archive and encryption adapter.
//!
//! The engine hands directories to an [`ArchiveAdapter`] and gets back a
//! single compressed file plus per-file counts. When encryption is on, the
//! same adapter fetches the recipient key and encrypts the archive.
//!
//! Output files are returned as [`TempPath`] guards: dropping a guard removes
//! the file, so temporaries disappear on success, failure and cancellation
//! alike.

pub mod gpg;
pub mod tarball;

pub use gpg::Gpg;

use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempPath;

/// Result of archiving one directory
#[derive(Debug)]
pub struct ArchiveReport {
    /// The archive on local disk, removed when dropped
    pub archive: TempPath,
    pub total_files: usize,
    pub total_dirs: usize,
    pub success_files: usize,
    /// Files left out of the archive, with the reason
    pub failed_files: BTreeMap<PathBuf, String>,
}

/// Archive/encrypt capability consumed by the backup engine
#[async_trait]
pub trait ArchiveAdapter: Send + Sync {
    /// Pack a directory into a single compressed file
    async fn archive_directory(&self, dir: &Path) -> Result<ArchiveReport>;

    /// Fetch the recipient public key from a key server
    async fn fetch_public_key(&self, key_id: &str, key_server: &str) -> Result<()>;

    /// Encrypt a file for the fetched key and return the encrypted copy
    async fn encrypt_file(&self, path: &Path) -> Result<TempPath>;
}

/// tar.gz archives on local disk, encrypted with GnuPG
#[derive(Debug, Default)]
pub struct LocalArchiver {
    gpg: Gpg,
}

impl LocalArchiver {
    /// Create an archiver, optionally pointing GnuPG at a specific home directory
    pub fn new(gpg_home: Option<PathBuf>) -> Self {
        Self {
            gpg: Gpg::new(gpg_home),
        }
    }
}

/// Raises the flag when dropped, so a blocking worker stops once its
/// caller has gone away
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl ArchiveAdapter for LocalArchiver {
    async fn archive_directory(&self, dir: &Path) -> Result<ArchiveReport> {
        let dir = dir.to_path_buf();
        let cancelled = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(cancelled.clone());

        tokio::task::spawn_blocking(move || tarball::archive_directory(&dir, &cancelled))
            .await
            .map_err(|e| Error::Archive {
                reason: format!("archive task failed: {e}"),
            })?
    }

    async fn fetch_public_key(&self, key_id: &str, key_server: &str) -> Result<()> {
        self.gpg.fetch_public_key(key_id, key_server).await
    }

    async fn encrypt_file(&self, path: &Path) -> Result<TempPath> {
        self.gpg.encrypt_file(path).await
    }
}
