//! Backup command implementation.

use crate::engine::BackupManager;
use crate::{Error, Result};
use clap::{Args, Subcommand};
use std::fmt::Write;
use std::path::Path;
use tracing::error;

/// Arguments for the backup command
#[derive(Args)]
pub struct BackupArgs {
    /// Defaults to `add`
    #[command(subcommand)]
    pub command: Option<BackupCommand>,
}

/// Backup subcommands
#[derive(Subcommand, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackupCommand {
    /// Back up every configured directory
    Add,
    /// List stored backups, newest first
    List,
    /// Delete backups beyond the retention count
    Purge,
    /// Back up, then purge old backups
    Run,
}

/// Run the backup command
pub async fn run(args: BackupArgs, config_path: Option<&Path>) -> Result<()> {
    let manager = super::build_manager(config_path).await?;

    match args.command.unwrap_or(BackupCommand::Add) {
        BackupCommand::Add => add(&manager).await,
        BackupCommand::List => list(&manager).await,
        BackupCommand::Purge => purge(&manager).await,
        BackupCommand::Run => {
            let backup = add(&manager).await;
            if let Err(e) = &backup {
                error!("Backup failed: {}", e);
            }
            // Retention still applies after a failed backup
            purge(&manager).await?;
            backup
        }
    }
}

async fn add(manager: &BackupManager) -> Result<()> {
    let summary = manager.backup().await?;

    println!(
        "Backup finished: {} succeeded, {} failed",
        summary.succeeded.len(),
        summary.failed.len()
    );
    for (dir, key) in &summary.succeeded {
        println!("  ok      {} -> {}", dir.display(), key);
    }
    for (dir, stage) in &summary.failed {
        println!("  failed  {} ({})", dir.display(), stage);
    }

    if summary.all_failed() {
        return Err(Error::AllTargetsFailed {
            count: summary.failed.len(),
        });
    }
    Ok(())
}

async fn list(manager: &BackupManager) -> Result<()> {
    let timestamps = manager.list_backups().await?;
    print!("{}", format_listing(&timestamps));
    Ok(())
}

async fn purge(manager: &BackupManager) -> Result<()> {
    let summary = manager.purge_old_backups().await?;
    println!(
        "Purge finished: {} kept, {} deleted, {} failed",
        summary.retained.len(),
        summary.deleted.len(),
        summary.failed.len()
    );
    Ok(())
}

fn format_listing(timestamps: &[String]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total backups: {}", timestamps.len());
    if timestamps.is_empty() {
        return out;
    }

    let width = timestamps.len().to_string().len().max(1);
    let _ = writeln!(out, "{:>width$}  TIMESTAMP", "#");
    for (index, timestamp) in timestamps.iter().enumerate() {
        let _ = writeln!(out, "{:>width$}  {}", index + 1, timestamp);
    }
    out
}
