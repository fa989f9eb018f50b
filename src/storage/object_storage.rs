//! Object storage backend (S3/MinIO, local filesystem, memory).
//!
//! Layout:
//! - single files: `<prefix>/<hostname>/<timestamp>/<file name>`
//! - directories: `<prefix>/<hostname>/<timestamp>/<dir name>/<relative path>`
//!
//! Listing uses a delimiter query under `<prefix>/<hostname>` so that each
//! backup shows up once, as its timestamped common prefix.

use super::{StorageBackend, UploadResult};
use crate::config::{Config, StorageConfig, StorageKind};
use crate::keys::KeyScheme;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore, WriteMultipart};
use std::io;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Files above this size are uploaded in parts (8 MiB)
const MULTIPART_THRESHOLD: u64 = 8 * 1024 * 1024;

/// Read size for multipart uploads (5 MiB, the S3 minimum part size)
const UPLOAD_BUFFER_SIZE: usize = 5 * 1024 * 1024;

/// Parts allowed in flight during a multipart upload
const MAX_IN_FLIGHT_PARTS: usize = 4;

const DEFAULT_REGION: &str = "us-east-1";

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// [`StorageBackend`] on top of the `object_store` crate
pub struct ObjectStorage {
    config: StorageConfig,
    keys: KeyScheme,
    store: OnceLock<Arc<dyn ObjectStore>>,
    clock: Clock,
}

impl ObjectStorage {
    /// Create a backend for `config`; call [`StorageBackend::init`] before use
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.storage.clone(),
            keys: config.key_scheme(),
            store: OnceLock::new(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Create a backend over an existing store. No `init` needed.
    pub fn with_store(config: &Config, store: Arc<dyn ObjectStore>) -> Self {
        let storage = Self::new(config);
        let _ = storage.store.set(store);
        storage
    }

    /// Replace the wall clock used for timestamped keys
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    fn store(&self) -> Result<&Arc<dyn ObjectStore>> {
        self.store.get().ok_or_else(|| Error::StorageInit {
            reason: format!("{} used before init", self.name()),
        })
    }

    async fn build_store(&self) -> Result<Arc<dyn ObjectStore>> {
        let store: Arc<dyn ObjectStore> = match self.config.kind {
            StorageKind::Memory => Arc::new(InMemory::new()),

            StorageKind::Local => {
                let path = self.config.path.as_ref().ok_or_else(|| Error::StorageInit {
                    reason: "storage.path is required for local storage".to_string(),
                })?;
                tokio::fs::create_dir_all(path).await?;
                Arc::new(
                    LocalFileSystem::new_with_prefix(path)
                        .map_err(|e| Error::StorageInit { reason: e.to_string() })?,
                )
            }

            StorageKind::S3 => {
                if self.config.bucket.is_empty() {
                    return Err(Error::StorageInit {
                        reason: "storage.bucket is required for s3 storage".to_string(),
                    });
                }

                let region = if self.config.region.is_empty() {
                    DEFAULT_REGION
                } else {
                    self.config.region.as_str()
                };

                let mut builder = AmazonS3Builder::new()
                    .with_bucket_name(&self.config.bucket)
                    .with_region(region)
                    .with_access_key_id(&self.config.access_key)
                    .with_secret_access_key(&self.config.secret_key);

                if !self.config.endpoint.is_empty() {
                    builder = builder
                        .with_endpoint(&self.config.endpoint)
                        .with_allow_http(self.config.endpoint.starts_with("http://"));
                }

                Arc::new(
                    builder
                        .build()
                        .map_err(|e| Error::StorageInit { reason: e.to_string() })?,
                )
            }
        };

        Ok(store)
    }

    /// Upload one local file to `location`, in parts when it is large
    async fn put_file(
        store: &Arc<dyn ObjectStore>,
        location: &ObjectPath,
        local_path: &Path,
    ) -> Result<()> {
        let size = tokio::fs::metadata(local_path).await?.len();
        if size <= MULTIPART_THRESHOLD {
            let data = tokio::fs::read(local_path).await?;
            store.put(location, Bytes::from(data).into()).await?;
            return Ok(());
        }

        let upload = store.put_multipart(location).await?;
        let mut writer = WriteMultipart::new(upload);
        let mut file = tokio::fs::File::open(local_path).await?;
        let mut buffer = vec![0u8; UPLOAD_BUFFER_SIZE];

        let streamed: Result<()> = async {
            loop {
                let read = file.read(&mut buffer).await?;
                if read == 0 {
                    return Ok::<(), Error>(());
                }
                writer.wait_for_capacity(MAX_IN_FLIGHT_PARTS).await?;
                writer.write(&buffer[..read]);
            }
        }
        .await;

        match streamed {
            Ok(()) => {
                writer.finish().await?;
                Ok(())
            }
            Err(e) => {
                let _ = writer.abort().await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl StorageBackend for ObjectStorage {
    async fn init(&self) -> Result<()> {
        if self.store.get().is_some() {
            return Ok(());
        }

        let store = self.build_store().await?;

        // Fail fast on bad credentials or a missing bucket
        let root = ObjectPath::from(self.keys.root_key());
        store
            .list_with_delimiter(Some(&root))
            .await
            .map_err(|e| Error::StorageInit {
                reason: format!("{}: {}", self.name(), e),
            })?;

        let _ = self.store.set(store);
        info!("Storage session established: {}", self.name());
        Ok(())
    }

    async fn upload_file(&self, local_path: &Path) -> Result<String> {
        let store = self.store()?;
        let file_name = local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a file path: {}", local_path.display()),
                ))
            })?;

        let base_key = self.keys.timestamped_key((self.clock)());
        let location = ObjectPath::from(format!("{base_key}/{file_name}"));

        debug!(
            "Uploading file {} to {} as {}",
            local_path.display(),
            self.name(),
            location
        );
        Self::put_file(store, &location, local_path).await?;
        Ok(base_key)
    }

    async fn upload_directory(&self, local_path: &Path) -> Result<UploadResult> {
        let store = self.store()?;
        let metadata = tokio::fs::metadata(local_path).await?;
        if !metadata.is_dir() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a directory: {}", local_path.display()),
            )));
        }

        let base_key = self.keys.timestamped_key((self.clock)());
        let dir_name = local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut result = UploadResult {
            base_key: base_key.clone(),
            ..UploadResult::default()
        };
        let mut last_error = None;

        let entries: Vec<_> = WalkDir::new(local_path).follow_links(false).into_iter().collect();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| local_path.to_path_buf());
                    warn!("Skipping entry {}: {}", path.display(), e);
                    result.failed_files.insert(path, e.to_string());
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                result.total_dirs += 1;
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            result.total_files += 1;
            let relative = entry.path().strip_prefix(local_path).unwrap_or(entry.path());
            let location = ObjectPath::from(object_key(&base_key, &dir_name, relative));

            match Self::put_file(store, &location, entry.path()).await {
                Ok(()) => result.success_files += 1,
                Err(e) => {
                    warn!("Failed to upload {}: {}", entry.path().display(), e);
                    result
                        .failed_files
                        .insert(entry.path().to_path_buf(), e.to_string());
                    last_error = Some(e);
                }
            }
        }

        // Nothing made it: report the transport error rather than an empty backup
        if result.total_files > 0 && result.success_files == 0 {
            if let Some(e) = last_error {
                return Err(Error::Upload {
                    total_dirs: result.total_dirs,
                    total_files: result.total_files,
                    source: Box::new(e),
                });
            }
        }

        Ok(result)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let store = self.store()?;
        let root = ObjectPath::from(self.keys.root_key());
        let listing = store.list_with_delimiter(Some(&root)).await?;
        Ok(listing
            .common_prefixes
            .into_iter()
            .map(|prefix| prefix.to_string())
            .collect())
    }

    async fn delete(&self, timestamp: &str) -> Result<()> {
        if timestamp.is_empty() || timestamp.contains(crate::keys::KEY_SEPARATOR) {
            return Err(Error::config(format!(
                "refusing to delete invalid backup key segment: {timestamp:?}"
            )));
        }

        let store = self.store()?;
        let prefix = ObjectPath::from(self.keys.join(timestamp));
        let objects: Vec<ObjectMeta> = store.list(Some(&prefix)).try_collect().await?;
        if objects.is_empty() {
            warn!("Nothing stored under {}", prefix);
            return Err(Error::Storage(object_store::Error::NotFound {
                path: prefix.to_string(),
                source: "no objects under backup key".into(),
            }));
        }

        for meta in objects {
            store.delete(&meta.location).await?;
        }
        Ok(())
    }

    fn strip_prefix(&self, keys: &[String]) -> Vec<String> {
        self.keys.strip_prefix(keys)
    }

    fn name(&self) -> String {
        match self.config.kind {
            StorageKind::S3 => format!("s3 ({})", self.config.bucket),
            StorageKind::Local => format!(
                "local ({})",
                self.config
                    .path
                    .as_deref()
                    .map(Path::display)
                    .map(|p| p.to_string())
                    .unwrap_or_default()
            ),
            StorageKind::Memory => "memory".to_string(),
        }
    }
}

fn object_key(base_key: &str, dir_name: &str, relative: &Path) -> String {
    let mut parts = vec![base_key.to_string()];
    if !dir_name.is_empty() {
        parts.push(dir_name.to_string());
    }
    parts.extend(
        relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned()),
    );
    parts.join("/")
}
