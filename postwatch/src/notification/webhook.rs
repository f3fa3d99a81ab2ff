//! Chat notification channel
//!
//! Posts a short message to a Slack-compatible incoming webhook
//! configured in metadata.

use super::{Notification, Notifier};
use postwatch_common::meta::MetaHandler;
use postwatch_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const SETTINGS_KEY: &str = "chat_notifications";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub enabled: bool,
    pub webhook_url: String,
}

pub struct WebhookNotifier {
    meta: MetaHandler,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(meta: MetaHandler) -> Result<WebhookNotifier> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Internal(format!("building webhook client: {}", e)))?;

        Ok(WebhookNotifier { meta, client })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "chat"
    }

    async fn notify(&self, notification: &Notification, _language: &str) -> Result<()> {
        let Some(settings) = self.meta.retrieve_json::<Settings>(SETTINGS_KEY).await? else {
            debug!("chat channel not configured; skipping");
            return Ok(());
        };

        if !settings.enabled {
            return Ok(());
        }

        let text = format!(
            "New mail insight #{} ({}): {}",
            notification.id, notification.content_type, notification.content
        );

        self.client
            .post(&settings.webhook_url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Internal(format!("posting chat notification: {}", e)))?;

        Ok(())
    }
}
