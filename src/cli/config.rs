//! Config command implementation.

use crate::config::Config;
use crate::Result;
use clap::{Args, Subcommand};
use std::path::Path;

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands
#[derive(Subcommand, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Write a config file with default values
    Init,
}

/// Run the config command
pub fn run(args: ConfigArgs, config_path: Option<&Path>) -> Result<()> {
    match args.command {
        ConfigCommand::Init => {
            let path = Config::generate_file(config_path)?;
            println!("Config file written to {}", path.display());
            Ok(())
        }
    }
}
