//! Command-line interface for nova-s3-backup.

use crate::archive::LocalArchiver;
use crate::config::Config;
use crate::engine::BackupManager;
use crate::logging;
use crate::notify::NotifierStore;
use crate::storage::{ObjectStorage, StorageBackend};
use crate::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub mod backup;
pub mod config;

/// Nova S3 Backup - archive, encrypt and upload directories to object storage
#[derive(Parser)]
#[command(name = "nova-s3-backup")]
#[command(about = "Back up directories to S3-compatible object storage")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Config file (default: ./config.yaml, then the user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Abort the operation after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run, list and purge backups
    Backup(backup::BackupArgs),
    /// Manage the config file
    Config(config::ConfigArgs),
}

/// Run the parsed command line
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Backup(args) => backup::run(args, cli.config.as_deref()).await,
        Commands::Config(args) => config::run(args, cli.config.as_deref()),
    }
}

/// Load the config, start logging and build a manager over a live storage session
pub async fn build_manager(config_path: Option<&Path>) -> Result<BackupManager> {
    let config = Config::load(config_path)?;
    logging::init_logging(&config.logger.level, &config.logger.mode)?;
    for correction in &config.corrections {
        warn!("{}", correction);
    }

    let storage = ObjectStorage::new(&config);
    storage.init().await?;
    info!("Connected to {}", storage.name());

    let archiver = LocalArchiver::new(config.backup.encryption.gpg.home.clone());
    let notifier = NotifierStore::from_config(&config)?;

    Ok(BackupManager::new(
        Arc::new(config),
        Arc::new(storage),
        Arc::new(archiver),
        Arc::new(notifier),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_defaults_to_add() {
        let cli = Cli::try_parse_from(["nova-s3-backup", "backup"]).unwrap();
        match cli.command {
            Commands::Backup(args) => assert!(args.command.is_none()),
            _ => panic!("expected backup command"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "nova-s3-backup",
            "backup",
            "purge",
            "--config",
            "/etc/nova/config.yaml",
            "--timeout",
            "600",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/etc/nova/config.yaml")));
        assert_eq!(cli.timeout, Some(600));
        assert!(matches!(
            cli.command,
            Commands::Backup(backup::BackupArgs {
                command: Some(backup::BackupCommand::Purge)
            })
        ));
    }

    #[test]
    fn test_config_init_parses() {
        let cli = Cli::try_parse_from(["nova-s3-backup", "-c", "out.yaml", "config", "init"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config(config::ConfigArgs {
                command: config::ConfigCommand::Init
            })
        ));
    }
}
