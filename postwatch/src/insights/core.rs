//! Insight primitives
//!
//! Categories, ratings, the process-wide content-type registry, insight
//! insertion, and the detector contract. The registry is built once at
//! startup, before any database read; registering two content types with
//! the same durable id is a programming error and panics.

use crate::notification::{Center, Notification};
use chrono::{DateTime, TimeZone, Utc};
use postwatch_common::time::Clock;
use postwatch_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Sqlite, Transaction};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type Tx<'c> = Transaction<'c, Sqlite>;

/// Insight category. The integer values are durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Local,
    Comparative,
    Intel,
    News,
}

impl Category {
    pub fn as_i64(self) -> i64 {
        match self {
            Category::Local => 0,
            Category::Comparative => 1,
            Category::Intel => 2,
            Category::News => 3,
        }
    }

    pub fn from_i64(v: i64) -> Option<Category> {
        match v {
            0 => Some(Category::Local),
            1 => Some(Category::Comparative),
            2 => Some(Category::Intel),
            3 => Some(Category::News),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Category> {
        match name {
            "local" => Some(Category::Local),
            "comparative" => Some(Category::Comparative),
            "intel" => Some(Category::Intel),
            "news" => Some(Category::News),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Local => "local",
            Category::Comparative => "comparative",
            Category::Intel => "intel",
            Category::News => "news",
        };
        f.write_str(s)
    }
}

/// Insight rating. The integer values are durable. Bad-rated insights
/// are fanned out to the notification center on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rating {
    Unrated,
    Ok,
    Bad,
}

impl Rating {
    pub fn as_i64(self) -> i64 {
        match self {
            Rating::Unrated => 0,
            Rating::Ok => 1,
            Rating::Bad => 2,
        }
    }

    pub fn from_i64(v: i64) -> Option<Rating> {
        match v {
            0 => Some(Rating::Unrated),
            1 => Some(Rating::Ok),
            2 => Some(Rating::Bad),
            _ => None,
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Rating::Unrated => "unrated",
            Rating::Ok => "ok",
            Rating::Bad => "bad",
        };
        f.write_str(s)
    }
}

/// Decodes stored content JSON, validating it against the registered
/// content shape
pub type ContentDecoder = fn(&str) -> Result<serde_json::Value>;

/// Shared default decoder: deserialize into the typed content, then back
/// into a JSON value
pub fn default_decoder<T: DeserializeOwned + Serialize>(raw: &str) -> Result<serde_json::Value> {
    let typed: T = serde_json::from_str(raw)?;
    Ok(serde_json::to_value(typed)?)
}

struct RegistryEntry {
    id: i64,
    decoder: ContentDecoder,
}

/// Maps content-type labels to durable small-integer discriminators and
/// decode functions
#[derive(Default)]
pub struct ContentTypeRegistry {
    by_label: HashMap<&'static str, RegistryEntry>,
    by_id: HashMap<i64, &'static str>,
}

impl ContentTypeRegistry {
    pub fn new() -> ContentTypeRegistry {
        ContentTypeRegistry::default()
    }

    /// Panics when the id or label is already taken
    pub fn register(&mut self, label: &'static str, id: i64, decoder: ContentDecoder) {
        if let Some(existing) = self.by_id.get(&id) {
            panic!(
                "content type id {} is already registered for {:?}; ids must be unique",
                id, existing
            );
        }
        if self.by_label.contains_key(label) {
            panic!("content type {:?} is already registered", label);
        }

        self.by_label.insert(label, RegistryEntry { id, decoder });
        self.by_id.insert(id, label);
    }

    pub fn id_for_label(&self, label: &str) -> Result<i64> {
        self.by_label
            .get(label)
            .map(|e| e.id)
            .ok_or_else(|| Error::InvalidInput(format!("unknown insight content type {:?}", label)))
    }

    pub fn label_for_id(&self, id: i64) -> Result<&'static str> {
        self.by_id
            .get(&id)
            .copied()
            .ok_or_else(|| Error::InvalidInput(format!("unknown insight content type id {}", id)))
    }

    pub fn decode(&self, id: i64, raw: &str) -> Result<serde_json::Value> {
        let label = self.label_for_id(id)?;
        let entry = &self.by_label[label];
        (entry.decoder)(raw)
    }
}

#[derive(Debug, Clone)]
pub struct InsightProperties {
    pub time: DateTime<Utc>,
    pub category: Category,
    pub rating: Rating,
    pub content_type: &'static str,
    pub content: serde_json::Value,
}

/// Inserts insights and forwards bad-rated ones to the notification
/// center
pub struct Creator {
    registry: Arc<ContentTypeRegistry>,
    center: Arc<Center>,
}

impl Creator {
    pub fn new(registry: Arc<ContentTypeRegistry>, center: Arc<Center>) -> Creator {
        Creator { registry, center }
    }

    /// Insert an immutable insight row; returns the new insight id
    pub async fn generate_insight(
        &self,
        tx: &mut Tx<'_>,
        properties: InsightProperties,
    ) -> Result<i64> {
        let content_type_id = self.registry.id_for_label(properties.content_type)?;
        let content = serde_json::to_string(&properties.content)?;

        let id = sqlx::query(
            "INSERT INTO insights (time, category, rating, content_type, content) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(properties.time.timestamp())
        .bind(properties.category.as_i64())
        .bind(properties.rating.as_i64())
        .bind(content_type_id)
        .bind(&content)
        .execute(&mut **tx)
        .await?
        .last_insert_rowid();

        if properties.rating == Rating::Bad {
            self.center
                .notify(Notification {
                    id,
                    content_type: properties.content_type.to_owned(),
                    content: properties.content,
                })
                .await?;
        }

        Ok(id)
    }
}

/// A periodic step-function that may emit insights inside the engine's
/// shared write transaction
#[async_trait::async_trait]
pub trait Detector: Send {
    /// Label used for logging and sample generation
    fn name(&self) -> &'static str;

    async fn setup(&mut self, _tx: &mut Tx<'_>) -> Result<()> {
        Ok(())
    }

    async fn step(
        &mut self,
        clock: &dyn Clock,
        tx: &mut Tx<'_>,
        creator: &Creator,
    ) -> Result<()>;

    /// Whether the detector should be replayed over imported historical
    /// data
    fn is_historical(&self) -> bool {
        false
    }

    /// Development seeding; the default produces nothing
    async fn generate_sample_insight(
        &self,
        _clock: &dyn Clock,
        _tx: &mut Tx<'_>,
        _creator: &Creator,
    ) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Cursor of a detector's last meaningful execution, stored next to the
/// insights so both move under one transaction
pub async fn retrieve_last_detector_execution(
    tx: &mut Tx<'_>,
    kind: &str,
) -> Result<Option<DateTime<Utc>>> {
    let ts: Option<i64> =
        sqlx::query_scalar("SELECT ts FROM last_detector_execution WHERE kind = ?")
            .bind(kind)
            .fetch_optional(&mut **tx)
            .await?;

    Ok(ts.and_then(|ts| Utc.timestamp_opt(ts, 0).single()))
}

pub async fn store_last_detector_execution(
    tx: &mut Tx<'_>,
    kind: &str,
    time: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO last_detector_execution (kind, ts) VALUES (?, ?)
        ON CONFLICT (kind) DO UPDATE SET ts = excluded.ts
        "#,
    )
    .bind(kind)
    .bind(time.timestamp())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct FakeContent {
        title: String,
    }

    #[test]
    fn registry_resolves_both_directions() {
        let mut registry = ContentTypeRegistry::new();
        registry.register("fake_insight", 200, default_decoder::<FakeContent>);

        assert_eq!(registry.id_for_label("fake_insight").unwrap(), 200);
        assert_eq!(registry.label_for_id(200).unwrap(), "fake_insight");
        assert!(registry.id_for_label("nope").is_err());
        assert!(registry.label_for_id(201).is_err());
    }

    #[test]
    #[should_panic(expected = "must be unique")]
    fn duplicate_id_panics() {
        let mut registry = ContentTypeRegistry::new();
        registry.register("one", 7, default_decoder::<FakeContent>);
        registry.register("two", 7, default_decoder::<FakeContent>);
    }

    #[test]
    fn decoder_validates_the_shape() {
        let mut registry = ContentTypeRegistry::new();
        registry.register("fake_insight", 200, default_decoder::<FakeContent>);

        let ok = registry.decode(200, r#"{"title":"hello"}"#).unwrap();
        assert_eq!(ok["title"], "hello");

        assert!(registry.decode(200, r#"{"nope":1}"#).is_err());
    }
}
