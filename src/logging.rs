//! Logging setup.

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Default log level
pub const DEFAULT_LEVEL: &str = "info";

const VALID_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogMode {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl fmt::Display for LogMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogMode::Pretty => write!(f, "pretty"),
            LogMode::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogMode::Pretty),
            "json" => Ok(LogMode::Json),
            other => Err(Error::config(format!("invalid logger mode: {other}"))),
        }
    }
}

/// Whether `level` is a level name the logger understands
pub fn is_valid_level(level: &str) -> bool {
    VALID_LEVELS.contains(&level.trim().to_ascii_lowercase().as_str())
}

/// Filter for this crate at `level`, unless `RUST_LOG` says otherwise
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={}",
            env!("CARGO_CRATE_NAME"),
            level.trim().to_ascii_lowercase()
        ))
    })
}

/// Install the global subscriber
pub fn init_logging(level: &str, mode: &str) -> Result<()> {
    let filter = build_filter(level);
    let mode: LogMode = mode.parse()?;

    let result = match mode {
        LogMode::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .try_init(),
        LogMode::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init(),
    };

    result.map_err(|e| Error::config(format!("failed to initialise logging: {e}")))
}
