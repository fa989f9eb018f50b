//! Discord webhook notifier

use super::{BackupEvent, Notifier};
use crate::config::{Config, PROGRAM_PRETTY_IDENTIFIER};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const COLOR_SUCCESS: u32 = 1_498_748;
const COLOR_FAILURE: u32 = 14_554_702;
const COLOR_DELETE_FAILURE: u32 = 14_590_998;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

// Discord rejects embeds above these lengths
const MAX_DESCRIPTION: usize = 4096;
const MAX_FIELD_VALUE: usize = 1024;

#[derive(Debug, Serialize)]
struct WebhookMessage {
    username: String,
    content: String,
    embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
struct Embed {
    title: String,
    description: String,
    color: u32,
    fields: Vec<EmbedField>,
}

#[derive(Debug, Serialize)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

impl EmbedField {
    fn new(name: &str, value: impl Into<String>, inline: bool) -> Self {
        Self {
            name: name.to_string(),
            value: truncate(value.into(), MAX_FIELD_VALUE),
            inline,
        }
    }
}

/// Posts backup events to a Discord webhook as embeds
#[derive(Debug, Clone)]
pub struct DiscordNotifier {
    client: Client,
    webhook: Url,
    hostname: String,
    enabled: bool,
}

impl DiscordNotifier {
    pub fn new(config: &Config) -> Result<Self> {
        let webhook = Url::parse(config.notifiers.discord.webhook.trim()).map_err(|e| {
            Error::config(format!("invalid discord webhook URL: {e}"))
        })?;
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            webhook,
            hostname: config.backup.hostname.clone(),
            enabled: config.notifiers.discord.enabled,
        })
    }

    fn message(&self, event: &BackupEvent) -> WebhookMessage {
        let (headline, embed) = match event {
            BackupEvent::Succeeded {
                directory,
                total_dirs,
                total_files,
                success_files,
                key,
            } => (
                "Backup Successful",
                Embed {
                    title: "Backup completed".to_string(),
                    description: format!("`{}` was uploaded.", directory.display()),
                    color: COLOR_SUCCESS,
                    fields: vec![
                        EmbedField::new("Key", format!("`{key}`"), false),
                        EmbedField::new("Directories", total_dirs.to_string(), true),
                        EmbedField::new("Files", format!("{success_files}/{total_files}"), true),
                    ],
                },
            ),
            BackupEvent::Failed {
                directory,
                total_dirs,
                total_files,
                error,
            } => (
                "Backup Failed",
                Embed {
                    title: "Backup failed".to_string(),
                    description: truncate(
                        format!("`{}` could not be backed up:\n{error}", directory.display()),
                        MAX_DESCRIPTION,
                    ),
                    color: COLOR_FAILURE,
                    fields: vec![
                        EmbedField::new("Directories", total_dirs.to_string(), true),
                        EmbedField::new("Files", total_files.to_string(), true),
                    ],
                },
            ),
            BackupEvent::DeletionFailed { key, error } => (
                "Backup Deletion Failed",
                Embed {
                    title: "Backup deletion failed".to_string(),
                    description: truncate(
                        format!("`{key}` could not be deleted:\n{error}"),
                        MAX_DESCRIPTION,
                    ),
                    color: COLOR_DELETE_FAILURE,
                    fields: vec![EmbedField::new("Key", format!("`{key}`"), false)],
                },
            ),
        };

        WebhookMessage {
            username: PROGRAM_PRETTY_IDENTIFIER.to_string(),
            content: format!("**{}** - *{}*", headline, self.hostname),
            embeds: vec![embed],
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    fn name(&self) -> &str {
        "discord"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, event: &BackupEvent) -> Result<()> {
        let message = self.message(event);
        let response = self
            .client
            .post(self.webhook.clone())
            .json(&message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notification {
                reason: format!("discord webhook returned {status}: {}", body.trim()),
            });
        }

        debug!("Delivered {} to discord", event.kind());
        Ok(())
    }
}

fn truncate(mut value: String, max_chars: usize) -> String {
    if let Some((index, _)) = value.char_indices().nth(max_chars) {
        value.truncate(index);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::path::PathBuf;

    fn notifier(webhook: &str) -> DiscordNotifier {
        let mut config = Config::default();
        config.backup.hostname = "nas01".to_string();
        config.notifiers.enabled = true;
        config.notifiers.discord.enabled = true;
        config.notifiers.discord.webhook = webhook.to_string();
        DiscordNotifier::new(&config).unwrap()
    }

    fn success() -> BackupEvent {
        BackupEvent::Succeeded {
            directory: PathBuf::from("/srv/photos"),
            total_dirs: 4,
            total_files: 12,
            success_files: 11,
            key: "backups/nas01/20240101000000".to_string(),
        }
    }

    #[test]
    fn test_success_message() {
        let message = serde_json::to_value(notifier("https://discord.test/hook").message(&success()))
            .unwrap();

        assert_eq!(message["username"], json!("Nova S3 Backup"));
        assert_eq!(message["content"], json!("**Backup Successful** - *nas01*"));
        assert_eq!(message["embeds"][0]["color"], json!(COLOR_SUCCESS));
        assert_eq!(
            message["embeds"][0]["fields"][0]["value"],
            json!("`backups/nas01/20240101000000`")
        );
        assert_eq!(message["embeds"][0]["fields"][2]["value"], json!("11/12"));
    }

    #[test]
    fn test_failure_and_deletion_messages() {
        let notifier = notifier("https://discord.test/hook");

        let failed = notifier.message(&BackupEvent::Failed {
            directory: PathBuf::from("/srv/photos"),
            total_dirs: 0,
            total_files: 0,
            error: "no processable files".to_string(),
        });
        assert_eq!(failed.content, "**Backup Failed** - *nas01*");
        assert_eq!(failed.embeds[0].color, COLOR_FAILURE);
        assert!(failed.embeds[0].description.contains("no processable files"));

        let deletion = notifier.message(&BackupEvent::DeletionFailed {
            key: "20240101000000".to_string(),
            error: "access denied".to_string(),
        });
        assert_eq!(deletion.content, "**Backup Deletion Failed** - *nas01*");
        assert_eq!(deletion.embeds[0].color, COLOR_DELETE_FAILURE);
    }

    #[test]
    fn test_long_errors_are_truncated() {
        let message = notifier("https://discord.test/hook").message(&BackupEvent::Failed {
            directory: PathBuf::from("/srv"),
            total_dirs: 0,
            total_files: 0,
            error: "é".repeat(10_000),
        });
        assert_eq!(message.embeds[0].description.chars().count(), MAX_DESCRIPTION);
    }

    #[test]
    fn test_invalid_webhook_rejected() {
        let mut config = Config::default();
        config.notifiers.discord.webhook = "not a url".to_string();
        assert!(matches!(
            DiscordNotifier::new(&config),
            Err(Error::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_posts_to_webhook() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/webhooks/1/token")
                    .header("content-type", "application/json");
                then.status(204);
            })
            .await;

        let notifier = notifier(&server.url("/api/webhooks/1/token"));
        notifier.send(&success()).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_reports_http_errors() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/hook");
                then.status(500).body("webhook down");
            })
            .await;

        let notifier = notifier(&server.url("/hook"));
        let err = notifier.send(&success()).await.unwrap_err();

        match err {
            Error::Notification { reason } => {
                assert!(reason.contains("500"), "{reason}");
                assert!(reason.contains("webhook down"), "{reason}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        mock.assert_async().await;
    }
}
