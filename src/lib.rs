//! # Nova S3 Backup
//!
//! Scheduled backups of local directories to S3-compatible object storage.
//!
//! ## Features
//!
//! - **Pipeline**: each directory is archived (tar.gz), optionally encrypted
//!   with GnuPG, and uploaded under `<prefix>/<hostname>/<timestamp>`
//! - **Retention**: keeps the newest `retention-count` backups per host
//! - **Notifications**: success, failure and deletion-failure events to Discord
//! - **Storage**: S3-compatible buckets, a local directory, or memory
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nova_s3_backup::archive::LocalArchiver;
//! use nova_s3_backup::notify::NotifierStore;
//! use nova_s3_backup::storage::{ObjectStorage, StorageBackend};
//! use nova_s3_backup::{BackupManager, Config};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = Config::load(None)?;
//! let storage = ObjectStorage::new(&config);
//! storage.init().await?;
//! let notifier = NotifierStore::from_config(&config)?;
//!
//! let manager = BackupManager::new(
//!     Arc::new(config),
//!     Arc::new(storage),
//!     Arc::new(LocalArchiver::default()),
//!     Arc::new(notifier),
//! );
//! let summary = manager.backup().await?;
//! println!("{} directories backed up", summary.succeeded.len());
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod keys;
pub mod logging;
pub mod notify;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::Config;
pub use engine::{BackupManager, BackupSummary, PipelineStage, PurgeSummary};
pub use error::{Error, Result};
pub use keys::KeyScheme;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
