//! Nova S3 Backup
//!
//! Main binary entry point for the command-line interface.

use anyhow::{anyhow, Context};
use clap::Parser;
use nova_s3_backup::cli::{self, Cli};
use std::time::Duration;
use tracing::warn;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let deadline = cli.timeout.map(Duration::from_secs);

    let work = async {
        match deadline {
            Some(deadline) => tokio::time::timeout(deadline, cli::run(cli))
                .await
                .map_err(|_| anyhow!("operation timed out after {}s", deadline.as_secs()))?
                .context("nova-s3-backup failed"),
            None => cli::run(cli).await.context("nova-s3-backup failed"),
        }
    };

    // Dropping the running operation cancels it and removes its temp files
    tokio::select! {
        result = work => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling");
            Err(anyhow!("interrupted"))
        }
    }
}
