//! Email notification channel
//!
//! Submits one message per notification through the SMTP server
//! configured in metadata. The channel is inert until settings exist and
//! are enabled.

use super::{Notification, Notifier};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use postwatch_common::meta::MetaHandler;
use postwatch_common::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const SETTINGS_KEY: &str = "email_notifications";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub enabled: bool,
    pub sender: String,
    pub recipients: Vec<String>,
    pub server_name: String,
    pub server_port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

pub struct EmailNotifier {
    meta: MetaHandler,
}

impl EmailNotifier {
    pub fn new(meta: MetaHandler) -> EmailNotifier {
        EmailNotifier { meta }
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn notify(&self, notification: &Notification, _language: &str) -> Result<()> {
        let Some(settings) = self.meta.retrieve_json::<Settings>(SETTINGS_KEY).await? else {
            debug!("email channel not configured; skipping");
            return Ok(());
        };

        if !settings.enabled {
            return Ok(());
        }

        let body = serde_json::to_string_pretty(&notification.content)?;

        let mut builder = Message::builder()
            .from(
                settings
                    .sender
                    .parse()
                    .map_err(|e| Error::Config(format!("invalid sender address: {}", e)))?,
            )
            .subject(format!(
                "New mail insight: {} (#{})",
                notification.content_type, notification.id
            ))
            .header(ContentType::TEXT_PLAIN);

        for recipient in &settings.recipients {
            builder = builder.to(recipient
                .parse()
                .map_err(|e| Error::Config(format!("invalid recipient address: {}", e)))?);
        }

        let message = builder
            .body(body)
            .map_err(|e| Error::Internal(format!("building notification mail: {}", e)))?;

        let mut transport =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.server_name)
                .port(settings.server_port);

        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            transport = transport.credentials(Credentials::new(username.clone(), password.clone()));
        }

        transport
            .build()
            .send(message)
            .await
            .map_err(|e| Error::Internal(format!("sending notification mail: {}", e)))?;

        Ok(())
    }
}
