//! Recording test doubles for the engine's collaborators

use crate::archive::{ArchiveAdapter, ArchiveReport};
use crate::notify::{BackupEvent, NotificationSink};
use crate::storage::{StorageBackend, UploadResult};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempPath;

fn unavailable(what: &str) -> Error {
    Error::Storage(object_store::Error::Generic {
        store: "mock",
        source: format!("{what} unavailable").into(),
    })
}

/// Storage double holding a fixed listing and recording every call
#[derive(Default)]
pub struct MockStorage {
    pub prefix: String,
    pub listing: Mutex<Vec<String>>,
    pub fail_list: bool,
    pub fail_file_uploads: bool,
    pub hang_file_uploads: bool,
    pub fail_directories: HashSet<PathBuf>,
    pub fail_deletes: HashSet<String>,
    /// Uploaded paths, with whether they existed on disk at upload time
    pub uploaded_files: Mutex<Vec<(PathBuf, bool)>>,
    pub uploaded_dirs: Mutex<Vec<PathBuf>>,
    pub deleted: Mutex<Vec<String>>,
    pub list_calls: Mutex<usize>,
}

impl MockStorage {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            ..Default::default()
        }
    }

    /// Set the listing from bare timestamps
    pub fn with_backups(self, timestamps: &[&str]) -> Self {
        *self.listing.lock().unwrap() = timestamps
            .iter()
            .map(|ts| format!("{}/{}", self.prefix, ts))
            .collect();
        self
    }

    pub fn uploaded_files(&self) -> Vec<(PathBuf, bool)> {
        self.uploaded_files.lock().unwrap().clone()
    }

    pub fn uploaded_dirs(&self) -> Vec<PathBuf> {
        self.uploaded_dirs.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageBackend for MockStorage {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn upload_file(&self, local_path: &Path) -> Result<String> {
        self.uploaded_files
            .lock()
            .unwrap()
            .push((local_path.to_path_buf(), local_path.exists()));
        if self.hang_file_uploads {
            std::future::pending::<()>().await;
        }
        if self.fail_file_uploads {
            return Err(unavailable("bucket"));
        }
        Ok(format!("{}/20240101000000", self.prefix))
    }

    async fn upload_directory(&self, local_path: &Path) -> Result<UploadResult> {
        self.uploaded_dirs
            .lock()
            .unwrap()
            .push(local_path.to_path_buf());
        if self.fail_directories.contains(local_path) {
            return Err(Error::Upload {
                total_dirs: 1,
                total_files: 2,
                source: Box::new(unavailable("transport")),
            });
        }
        Ok(UploadResult {
            base_key: format!("{}/20240101000000", self.prefix),
            total_files: 2,
            total_dirs: 1,
            success_files: 2,
            failed_files: BTreeMap::new(),
        })
    }

    async fn list(&self) -> Result<Vec<String>> {
        *self.list_calls.lock().unwrap() += 1;
        if self.fail_list {
            return Err(unavailable("listing"));
        }
        Ok(self.listing.lock().unwrap().clone())
    }

    async fn delete(&self, timestamp: &str) -> Result<()> {
        if self.fail_deletes.contains(timestamp) {
            return Err(unavailable("delete"));
        }
        self.deleted.lock().unwrap().push(timestamp.to_string());
        let key = format!("{}/{}", self.prefix, timestamp);
        self.listing.lock().unwrap().retain(|k| *k != key);
        Ok(())
    }

    fn strip_prefix(&self, keys: &[String]) -> Vec<String> {
        let prefix = format!("{}/", self.prefix);
        keys.iter()
            .map(|key| key.strip_prefix(&prefix).unwrap_or(key).to_string())
            .collect()
    }

    fn name(&self) -> String {
        "mock".to_string()
    }
}

/// Archiver double writing small real files to the temp directory
#[derive(Default)]
pub struct MockArchiver {
    pub success_files: usize,
    pub fail_archive: bool,
    pub fail_fetch: bool,
    pub fail_encrypt: bool,
    pub archived: Mutex<Vec<PathBuf>>,
    pub encrypted: Mutex<Vec<PathBuf>>,
    pub key_fetches: Mutex<usize>,
}

impl MockArchiver {
    pub fn with_files(success_files: usize) -> Self {
        Self {
            success_files,
            ..Default::default()
        }
    }

    pub fn archived(&self) -> Vec<PathBuf> {
        self.archived.lock().unwrap().clone()
    }

    pub fn encrypted(&self) -> Vec<PathBuf> {
        self.encrypted.lock().unwrap().clone()
    }

    pub fn key_fetches(&self) -> usize {
        *self.key_fetches.lock().unwrap()
    }
}

#[async_trait]
impl ArchiveAdapter for MockArchiver {
    async fn archive_directory(&self, _dir: &Path) -> Result<ArchiveReport> {
        if self.fail_archive {
            return Err(Error::Archive {
                reason: "disk full".to_string(),
            });
        }
        let archive = tempfile::Builder::new()
            .suffix(".tar.gz")
            .tempfile()?
            .into_temp_path();
        self.archived.lock().unwrap().push(archive.to_path_buf());
        Ok(ArchiveReport {
            archive,
            total_files: self.success_files + 1,
            total_dirs: 3,
            success_files: self.success_files,
            failed_files: BTreeMap::new(),
        })
    }

    async fn fetch_public_key(&self, _key_id: &str, _key_server: &str) -> Result<()> {
        *self.key_fetches.lock().unwrap() += 1;
        if self.fail_fetch {
            return Err(Error::Encryption {
                reason: "key server unreachable".to_string(),
            });
        }
        Ok(())
    }

    async fn encrypt_file(&self, path: &Path) -> Result<TempPath> {
        if self.fail_encrypt {
            return Err(Error::Encryption {
                reason: "bad key".to_string(),
            });
        }
        let mut output = OsString::from(path.as_os_str());
        output.push(".gpg");
        let output = PathBuf::from(output);
        std::fs::write(&output, b"encrypted")?;
        self.encrypted.lock().unwrap().push(output.clone());
        Ok(TempPath::try_from_path(output)?)
    }
}

/// Sink double keeping every event in order
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<BackupEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<BackupEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, event: &BackupEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
