//! GnuPG public-key encryption through the `gpg` binary.

use crate::{Error, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::{Mutex, PoisonError};
use tempfile::TempPath;
use tokio::process::Command;
use tracing::debug;

const DEFAULT_BINARY: &str = "gpg";

/// Thin wrapper over the `gpg` command line.
///
/// The key ID passed to [`Gpg::fetch_public_key`] becomes the recipient of
/// later [`Gpg::encrypt_file`] calls.
#[derive(Debug)]
pub struct Gpg {
    binary: PathBuf,
    home: Option<PathBuf>,
    recipient: Mutex<Option<String>>,
}

impl Default for Gpg {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Gpg {
    /// Create a wrapper using `gpg` from `PATH`
    pub fn new(home: Option<PathBuf>) -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_BINARY),
            home,
            recipient: Mutex::new(None),
        }
    }

    /// Use a different gpg executable
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--batch").arg("--no-tty");
        if let Some(home) = &self.home {
            cmd.arg("--homedir").arg(home);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command, action: &str) -> Result<Output> {
        let output = cmd.output().await.map_err(|e| Error::Encryption {
            reason: format!("failed to spawn {}: {}", self.binary.display(), e),
        })?;

        if !output.status.success() {
            return Err(Error::Encryption {
                reason: format!(
                    "gpg {} failed ({}): {}",
                    action,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(output)
    }

    /// Import `key_id` from `key_server` into the keyring
    pub async fn fetch_public_key(&self, key_id: &str, key_server: &str) -> Result<()> {
        if key_id.trim().is_empty() || key_server.trim().is_empty() {
            return Err(Error::Encryption {
                reason: "key ID and key server are required".to_string(),
            });
        }

        let mut cmd = self.command();
        cmd.arg("--keyserver")
            .arg(key_server)
            .arg("--recv-keys")
            .arg(key_id);
        self.run(cmd, "--recv-keys").await?;

        debug!("Fetched GPG key {} from {}", key_id, key_server);
        *self
            .recipient
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(key_id.to_string());
        Ok(())
    }

    /// Encrypt `path` to `<path>.gpg` for the fetched key
    pub async fn encrypt_file(&self, path: &Path) -> Result<TempPath> {
        let recipient = self
            .recipient
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::Encryption {
                reason: "no public key fetched".to_string(),
            })?;

        let mut output_path = OsString::from(path.as_os_str());
        output_path.push(".gpg");
        // Guard first, so a half-written output is removed on failure
        let encrypted = TempPath::try_from_path(PathBuf::from(output_path))?;

        let mut cmd = self.command();
        cmd.arg("--yes")
            .arg("--trust-model")
            .arg("always")
            .arg("--recipient")
            .arg(&recipient)
            .arg("--output")
            .arg(&*encrypted)
            .arg("--encrypt")
            .arg(path);
        self.run(cmd, "--encrypt").await?;

        debug!("Encrypted {} to {}", path.display(), encrypted.display());
        Ok(encrypted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_encrypt_requires_fetched_key() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("archive.tar.gz");
        std::fs::write(&file, b"data").unwrap();

        let gpg = Gpg::default();
        let err = gpg.encrypt_file(&file).await.unwrap_err();
        assert!(matches!(err, Error::Encryption { .. }));
        assert!(!temp_dir.path().join("archive.tar.gz.gpg").exists());
    }

    #[tokio::test]
    async fn test_fetch_requires_key_and_server() {
        let gpg = Gpg::default();
        assert!(gpg.fetch_public_key("", "hkps://keys.openpgp.org").await.is_err());
        assert!(gpg.fetch_public_key("ABCDEF", " ").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_binary_is_encryption_error() {
        let gpg = Gpg::default().with_binary("/nonexistent/bin/gpg");
        let err = gpg
            .fetch_public_key("ABCDEF", "hkps://keys.openpgp.org")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Encryption { .. }));
    }

    #[tokio::test]
    async fn test_failing_command_reports_status() {
        // `false` exits non-zero for any arguments
        let gpg = Gpg::default().with_binary("false");
        let err = gpg
            .fetch_public_key("ABCDEF", "hkps://keys.openpgp.org")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("--recv-keys"));
    }
}
