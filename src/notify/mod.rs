//! Backup notifications.
//!
//! The engine reports every terminal pipeline state and every failed
//! deletion to a [`NotificationSink`]. The concrete sink, [`NotifierStore`],
//! broadcasts each event to the registered [`Notifier`] channels. Delivery is
//! fire-and-forget: channel errors are logged, never returned.

pub mod discord;

pub use discord::DiscordNotifier;

use crate::config::Config;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error};

/// One notification, delivered once and then discarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupEvent {
    /// A target was uploaded
    Succeeded {
        directory: PathBuf,
        total_dirs: usize,
        total_files: usize,
        success_files: usize,
        key: String,
    },
    /// A target's pipeline failed
    Failed {
        directory: PathBuf,
        total_dirs: usize,
        total_files: usize,
        error: String,
    },
    /// A backup selected by the retention policy could not be deleted
    DeletionFailed { key: String, error: String },
}

impl BackupEvent {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            BackupEvent::Succeeded { .. } => "backup-success",
            BackupEvent::Failed { .. } => "backup-failure",
            BackupEvent::DeletionFailed { .. } => "backup-delete-failure",
        }
    }
}

/// Where the engine sends its events
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver an event; never fails
    async fn notify(&self, event: &BackupEvent);

    async fn notify_backup_success(
        &self,
        directory: &Path,
        total_dirs: usize,
        total_files: usize,
        success_files: usize,
        key: &str,
    ) {
        self.notify(&BackupEvent::Succeeded {
            directory: directory.to_path_buf(),
            total_dirs,
            total_files,
            success_files,
            key: key.to_string(),
        })
        .await
    }

    async fn notify_backup_failure(
        &self,
        directory: &Path,
        total_dirs: usize,
        total_files: usize,
        error: &Error,
    ) {
        self.notify(&BackupEvent::Failed {
            directory: directory.to_path_buf(),
            total_dirs,
            total_files,
            error: error.to_string(),
        })
        .await
    }

    async fn notify_backup_delete_failure(&self, key: &str, error: &Error) {
        self.notify(&BackupEvent::DeletionFailed {
            key: key.to_string(),
            error: error.to_string(),
        })
        .await
    }
}

/// A single notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name used in logs
    fn name(&self) -> &str;

    /// Whether this channel should receive events
    fn enabled(&self) -> bool;

    /// Deliver one event
    async fn send(&self, event: &BackupEvent) -> Result<()>;
}

/// Broadcasts events to every registered notifier.
///
/// The lock only guards registration; delivery works on a snapshot of the
/// registered channels, so concurrent notifications never wait on each other.
pub struct NotifierStore {
    enabled: bool,
    notifiers: RwLock<Vec<Arc<dyn Notifier>>>,
}

impl NotifierStore {
    /// Create an empty store; `enabled` is the global notifications switch
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            notifiers: RwLock::new(Vec::new()),
        }
    }

    /// Create a store and register every channel enabled in `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Self::new(config.notifiers.enabled);
        store.init_store(config)?;
        Ok(store)
    }

    /// Register the channels enabled in `config`
    pub fn init_store(&self, config: &Config) -> Result<()> {
        if config.notifiers.discord.enabled {
            let discord = DiscordNotifier::new(config)?;
            self.register(Arc::new(discord));
        }
        Ok(())
    }

    /// Add a channel
    pub fn register(&self, notifier: Arc<dyn Notifier>) {
        debug!("Registering notifier {}", notifier.name());
        self.notifiers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notifier);
    }

    /// Whether notifications are globally enabled
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Number of registered channels
    pub fn len(&self) -> usize {
        self.notifiers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn Notifier>> {
        self.notifiers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl NotificationSink for NotifierStore {
    async fn notify(&self, event: &BackupEvent) {
        if !self.enabled {
            debug!("Notifiers are disabled; skipping {}", event.kind());
            return;
        }

        for notifier in self.snapshot() {
            if !notifier.enabled() {
                debug!("Notifier {} disabled; skipping {}", notifier.name(), event.kind());
                continue;
            }
            if let Err(e) = notifier.send(event).await {
                error!("Failed to send {} via {}: {}", event.kind(), notifier.name(), e);
            }
        }
    }
}
