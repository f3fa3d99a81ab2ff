//! Metadata store
//!
//! Durable key/value storage with JSON-coded values, backed by a `meta`
//! table in the master database. Used for settings and detector cursors.

use crate::db::{ConnPair, Migration};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const MIGRATIONS: &[Migration] = &[Migration {
    name: "1_meta",
    up: &["CREATE TABLE meta (key TEXT NOT NULL UNIQUE, value TEXT)"],
    down: &["DROP TABLE meta"],
}];

/// Handle over the metadata table of one database
#[derive(Debug, Clone)]
pub struct MetaHandler {
    pair: ConnPair,
}

impl MetaHandler {
    pub fn new(pair: ConnPair) -> MetaHandler {
        MetaHandler { pair }
    }

    /// Store a JSON-coded value, replacing any previous one
    pub async fn store_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let encoded = serde_json::to_string(value)?;

        sqlx::query(
            r#"
            INSERT INTO meta (key, value) VALUES (?, ?)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(encoded)
        .execute(self.pair.write())
        .await?;

        Ok(())
    }

    /// Retrieve a JSON-coded value. Missing keys are `Ok(None)`.
    pub async fn retrieve_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pair.read())
            .await?;

        match raw {
            None => Ok(None),
            Some(raw) => {
                let value = serde_json::from_str(&raw).map_err(|e| {
                    Error::Internal(format!("Corrupt metadata value for key {:?}: {}", key, e))
                })?;
                Ok(Some(value))
            }
        }
    }

    pub async fn close(&self) {
        self.pair.close().await;
    }
}
