//! Error types for nova-s3-backup

use thiserror::Error;

/// Main error type for backup operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Object storage error: {0}")]
    Storage(#[from] object_store::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Upload failed ({total_files} files, {total_dirs} dirs): {source}")]
    Upload {
        total_dirs: usize,
        total_files: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Storage session could not be established: {reason}")]
    StorageInit { reason: String },

    #[error("Archive error: {reason}")]
    Archive { reason: String },

    #[error("Encryption error: {reason}")]
    Encryption { reason: String },

    #[error("Notification delivery failed: {reason}")]
    Notification { reason: String },

    #[error("no processable files")]
    NoProcessableFiles,

    #[error("All {count} backup targets failed")]
    AllTargetsFailed { count: usize },
}

impl Error {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Error::Configuration {
            reason: reason.into(),
        }
    }
}

/// Result type alias for backup operations
pub type Result<T> = std::result::Result<T, Error>;
