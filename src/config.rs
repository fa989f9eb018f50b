//! Configuration for backup runs.
//!
//! Configuration is read from a YAML file and then overridden by
//! `NOVA_BACKUP_*` environment variables. Validation rejects unusable settings
//! and silently corrects inconsistent ones (for example, encryption without
//! archiving). The corrections are kept on the config so they can be logged
//! once logging is up.

use crate::keys::KeyScheme;
use crate::logging;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, error, warn};

/// Program identifier used for config directories and key defaults
pub const PROGRAM_IDENTIFIER: &str = "nova-s3-backup";

/// Human-readable program name
pub const PROGRAM_PRETTY_IDENTIFIER: &str = "Nova S3 Backup";

/// Default config file name
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "NOVA_BACKUP_";

/// Default timestamp layout, lexically sortable
pub const DEFAULT_DATE_TIME_LAYOUT: &str = "%Y%m%d%H%M%S";

/// Default number of backups kept per host
pub const DEFAULT_RETENTION_COUNT: u32 = 30;

/// Full program configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub storage: StorageConfig,
    pub backup: BackupConfig,
    pub notifiers: NotifiersConfig,
    pub logger: LoggerConfig,

    /// Corrections applied during validation
    #[serde(skip)]
    pub corrections: Vec<String>,
}

/// Kind of object storage backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// S3-compatible object storage (AWS S3, MinIO, ...)
    #[default]
    S3,
    /// Local filesystem directory
    Local,
    /// In-process memory, lost on exit
    Memory,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::S3 => write!(f, "s3"),
            StorageKind::Local => write!(f, "local"),
            StorageKind::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StorageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" => Ok(StorageKind::S3),
            "local" => Ok(StorageKind::Local),
            "memory" => Ok(StorageKind::Memory),
            other => Err(Error::config(format!("unknown storage kind: {other}"))),
        }
    }
}

/// Object storage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StorageConfig {
    pub kind: StorageKind,
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    /// Key prefix placed before the hostname
    pub prefix: String,
    /// Root directory for the `local` kind
    pub path: Option<PathBuf>,
}

/// GnuPG settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GpgConfig {
    pub key_server: String,
    pub key_id: String,
    /// Alternative GnuPG home directory
    pub home: Option<PathBuf>,
}

/// Archive encryption settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EncryptionConfig {
    pub enabled: bool,
    pub gpg: GpgConfig,
}

/// What to back up and how long to keep it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BackupConfig {
    pub dirs: Vec<PathBuf>,
    pub hostname: String,
    pub retention_count: u32,
    pub date_time_layout: String,
    pub archive_dirs: bool,
    pub encryption: EncryptionConfig,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dirs: Vec::new(),
            hostname: default_hostname(),
            retention_count: DEFAULT_RETENTION_COUNT,
            date_time_layout: DEFAULT_DATE_TIME_LAYOUT.to_string(),
            archive_dirs: false,
            encryption: EncryptionConfig::default(),
        }
    }
}

/// Discord webhook notifier settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DiscordConfig {
    pub enabled: bool,
    pub webhook: String,
}

/// Notification settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NotifiersConfig {
    pub enabled: bool,
    pub discord: DiscordConfig,
}

/// Logger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggerConfig {
    pub level: String,
    pub mode: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: logging::DEFAULT_LEVEL.to_string(),
            mode: logging::LogMode::default().to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path` (or the default search paths) and the
    /// process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, std::env::vars())
    }

    /// Load configuration from `path` and an explicit set of environment
    /// variables
    pub fn load_from<I>(path: Option<&Path>, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = match Self::resolve_path(path) {
            Some(config_path) => {
                debug!("Loading config from {}", config_path.display());
                let content = fs::read_to_string(&config_path).map_err(|e| {
                    Error::config(format!(
                        "failed to read config file {}: {}",
                        config_path.display(),
                        e
                    ))
                })?;
                serde_yaml::from_str::<Config>(&content)?
            }
            None => {
                warn!("No config file found, relying on env vars and defaults");
                Config::default()
            }
        };

        config.apply_env_overrides(vars)?;
        config.validate()?;
        Ok(config)
    }

    /// Pick the config file to read.
    ///
    /// An explicit path is always used, even if it does not exist, so that a
    /// typo surfaces as a read error instead of silently using defaults.
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.is_file() {
            return Some(local);
        }

        Self::default_path().ok().filter(|path| path.is_file())
    }

    /// Per-user config file location
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::config("could not determine config directory"))?;
        Ok(config_dir.join(PROGRAM_IDENTIFIER).join(CONFIG_FILE_NAME))
    }

    /// Write a config file populated with defaults and return its path.
    ///
    /// Existing files are never overwritten.
    pub fn generate_file(path: Option<&Path>) -> Result<PathBuf> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        if config_path.exists() {
            return Err(Error::config(format!(
                "config file already exists: {}",
                config_path.display()
            )));
        }

        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_yaml::to_string(&Config::default())?;
        fs::write(&config_path, content)?;
        debug!("Config written to {}", config_path.display());
        Ok(config_path)
    }

    /// Apply `NOVA_BACKUP_*` overrides
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };

            match key {
                "STORAGE_KIND" => self.storage.kind = value.parse()?,
                "STORAGE_ENDPOINT" => self.storage.endpoint = value,
                "STORAGE_REGION" => self.storage.region = value,
                "STORAGE_ACCESS_KEY" => self.storage.access_key = value,
                "STORAGE_SECRET_KEY" => self.storage.secret_key = value,
                "STORAGE_BUCKET" => self.storage.bucket = value,
                "STORAGE_PREFIX" => self.storage.prefix = value,
                "STORAGE_PATH" => self.storage.path = Some(PathBuf::from(value)),
                "BACKUP_DIRS" => {
                    self.backup.dirs = value
                        .split(',')
                        .map(str::trim)
                        .filter(|dir| !dir.is_empty())
                        .map(PathBuf::from)
                        .collect();
                }
                "BACKUP_HOSTNAME" => self.backup.hostname = value,
                "BACKUP_RETENTION_COUNT" => {
                    self.backup.retention_count = value.trim().parse().map_err(|_| {
                        Error::config(format!("{name} must be a non-negative integer, got {value:?}"))
                    })?;
                }
                "BACKUP_DATE_TIME_LAYOUT" => self.backup.date_time_layout = value,
                "BACKUP_ARCHIVE_DIRS" => self.backup.archive_dirs = parse_bool(&name, &value)?,
                "BACKUP_ENCRYPTION_ENABLED" => {
                    self.backup.encryption.enabled = parse_bool(&name, &value)?
                }
                "BACKUP_ENCRYPTION_GPG_KEY_SERVER" => self.backup.encryption.gpg.key_server = value,
                "BACKUP_ENCRYPTION_GPG_KEY_ID" => self.backup.encryption.gpg.key_id = value,
                "BACKUP_ENCRYPTION_GPG_HOME" => {
                    self.backup.encryption.gpg.home = Some(PathBuf::from(value))
                }
                "NOTIFIERS_ENABLED" => self.notifiers.enabled = parse_bool(&name, &value)?,
                "NOTIFIERS_DISCORD_ENABLED" => {
                    self.notifiers.discord.enabled = parse_bool(&name, &value)?
                }
                "NOTIFIERS_DISCORD_WEBHOOK" => self.notifiers.discord.webhook = value,
                "LOGGER_LEVEL" => self.logger.level = value,
                "LOGGER_MODE" => self.logger.mode = value,
                _ => debug!("Ignoring unknown environment override {}", name),
            }
        }

        Ok(())
    }

    /// Validate the configuration, correcting inconsistent settings in place
    pub fn validate(&mut self) -> Result<()> {
        self.logger.validate()?;
        self.corrections.extend(self.backup.validate()?);
        self.corrections.extend(self.notifiers.validate());
        Ok(())
    }

    /// Key scheme for this host
    pub fn key_scheme(&self) -> KeyScheme {
        KeyScheme::new(
            self.storage.prefix.clone(),
            self.backup.hostname.clone(),
            self.backup.date_time_layout.clone(),
        )
    }
}

impl BackupConfig {
    fn validate(&mut self) -> Result<Vec<String>> {
        if self.dirs.is_empty() {
            return Err(Error::config("backup.dirs is required"));
        }

        if self.retention_count == 0 {
            return Err(Error::config("backup.retention-count must be greater than 0"));
        }

        if self.hostname.trim().is_empty() {
            return Err(Error::config("backup.hostname must not be empty"));
        }

        if !KeyScheme::is_valid_layout(&self.date_time_layout) {
            return Err(Error::config(format!(
                "backup.date-time-layout is not a usable layout: {:?}",
                self.date_time_layout
            )));
        }

        let mut corrections = Vec::new();
        if self.encryption.enabled && !self.archive_dirs {
            let msg = "Backup encryption is only available when archive dirs are enabled. Disabling encryption";
            warn!("{}", msg);
            self.encryption.enabled = false;
            corrections.push(msg.to_string());
        } else if self.encryption.enabled
            && (self.encryption.gpg.key_server.is_empty() || self.encryption.gpg.key_id.is_empty())
        {
            let msg = "Encryption is enabled but GPG key server or key ID is missing. Disabling encryption";
            error!("{}", msg);
            self.encryption.enabled = false;
            corrections.push(msg.to_string());
        }

        Ok(corrections)
    }
}

impl NotifiersConfig {
    fn validate(&mut self) -> Vec<String> {
        let mut corrections = Vec::new();
        if self.discord.enabled && self.discord.webhook.trim().is_empty() {
            let msg = "Discord notifier is enabled but webhook is not set. Disabling Discord notifier";
            warn!("{}", msg);
            self.discord.enabled = false;
            corrections.push(msg.to_string());
        }
        corrections
    }
}

impl LoggerConfig {
    fn validate(&self) -> Result<()> {
        if !logging::is_valid_level(&self.level) {
            return Err(Error::config(format!("invalid logger level: {}", self.level)));
        }
        if self.mode.parse::<logging::LogMode>().is_err() {
            return Err(Error::config(format!("invalid logger mode: {}", self.mode)));
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::config(format!("{name} must be a boolean, got {value:?}"))),
    }
}

fn default_hostname() -> String {
    fs::read_to_string("/etc/hostname")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|name| !name.is_empty()))
        .unwrap_or_else(|| "localhost".to_string())
}
