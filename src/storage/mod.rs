//! Storage backends for uploaded backups.
//!
//! The engine only talks to [`StorageBackend`]; the concrete
//! [`ObjectStorage`] maps it onto S3-compatible, local-filesystem or
//! in-memory object stores.

pub mod object_storage;

pub use object_storage::ObjectStorage;

use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Outcome of uploading one backup target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadResult {
    /// Timestamped key the backup was stored under
    pub base_key: String,
    pub total_files: usize,
    pub total_dirs: usize,
    pub success_files: usize,
    /// Files that could not be processed, with the reason
    pub failed_files: BTreeMap<PathBuf, String>,
}

/// Storage capability consumed by the backup engine
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Establish the storage session
    async fn init(&self) -> Result<()>;

    /// Upload a single local file and return the backup key it was stored under
    async fn upload_file(&self, local_path: &Path) -> Result<String>;

    /// Upload every file below a local directory
    async fn upload_directory(&self, local_path: &Path) -> Result<UploadResult>;

    /// Keys of all backups belonging to this host
    async fn list(&self) -> Result<Vec<String>>;

    /// Delete the backup identified by its timestamp segment
    async fn delete(&self, timestamp: &str) -> Result<()>;

    /// Reduce listed keys to their timestamp segments
    fn strip_prefix(&self, keys: &[String]) -> Vec<String>;

    /// Display name of the backend
    fn name(&self) -> String;
}
