//! Notification center
//!
//! Multiplexes emitted insights to a static set of named channels. Every
//! notification first passes a composite policy; a rejected notification
//! is a no-op. Dispatch never short-circuits: per-channel errors are
//! logged and the remaining channels still run. The language tag is
//! resolved freshly from metadata on every dispatch.

pub mod email;
pub mod webhook;

use postwatch_common::meta::MetaHandler;
use postwatch_common::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// What a channel receives: the insight id and its content
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: i64,
    pub content_type: String,
    pub content: serde_json::Value,
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, notification: &Notification, language: &str) -> Result<()>;
}

#[async_trait::async_trait]
pub trait Policy: Send + Sync {
    /// `true` stops the notification from being dispatched
    async fn reject(&self, notification: &Notification) -> Result<bool>;
}

/// Composite policy: rejects when any member rejects
#[derive(Default)]
pub struct Policies(Vec<Arc<dyn Policy>>);

impl Policies {
    pub fn new(policies: Vec<Arc<dyn Policy>>) -> Policies {
        Policies(policies)
    }

    pub async fn reject(&self, notification: &Notification) -> Result<bool> {
        for policy in &self.0 {
            if policy.reject(notification).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Lets everything through
pub struct PassPolicy;

#[async_trait::async_trait]
impl Policy for PassPolicy {
    async fn reject(&self, _notification: &Notification) -> Result<bool> {
        Ok(false)
    }
}

/// Global notification settings stored in metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_enabled() -> bool {
    true
}

fn default_language() -> String {
    "en".to_owned()
}

pub const SETTINGS_KEY: &str = "notifications";

/// Rejects everything while notifications are disabled in settings
pub struct SettingsPolicy {
    meta: MetaHandler,
}

impl SettingsPolicy {
    pub fn new(meta: MetaHandler) -> SettingsPolicy {
        SettingsPolicy { meta }
    }
}

#[async_trait::async_trait]
impl Policy for SettingsPolicy {
    async fn reject(&self, _notification: &Notification) -> Result<bool> {
        let settings: Option<Settings> = self.meta.retrieve_json(SETTINGS_KEY).await?;
        Ok(settings.map(|s| !s.enabled).unwrap_or(false))
    }
}

enum LanguageSource {
    Meta(MetaHandler),
    Fixed(String),
}

pub struct Center {
    notifiers: Vec<Arc<dyn Notifier>>,
    policies: Policies,
    language: LanguageSource,
}

impl Center {
    pub fn new(meta: MetaHandler, policies: Policies, notifiers: Vec<Arc<dyn Notifier>>) -> Center {
        Center {
            notifiers,
            policies,
            language: LanguageSource::Meta(meta),
        }
    }

    /// Center with a fixed language tag; used by tests
    pub fn with_fixed_language(
        language: &str,
        policies: Policies,
        notifiers: Vec<Arc<dyn Notifier>>,
    ) -> Center {
        Center {
            notifiers,
            policies,
            language: LanguageSource::Fixed(language.to_owned()),
        }
    }

    pub async fn notify(&self, notification: Notification) -> Result<()> {
        if self.policies.reject(&notification).await? {
            return Ok(());
        }

        let language = self.fetch_language().await?;

        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(&notification, &language).await {
                warn!(channel = notifier.name(), error = %e, "error notifying");
            }
        }

        Ok(())
    }

    async fn fetch_language(&self) -> Result<String> {
        match &self.language {
            LanguageSource::Fixed(language) => Ok(language.clone()),
            LanguageSource::Meta(meta) => {
                let settings: Option<Settings> = meta.retrieve_json(SETTINGS_KEY).await?;
                Ok(settings
                    .map(|s| s.language)
                    .unwrap_or_else(default_language))
            }
        }
    }
}
