//! Read-only insight queries for the API

use super::core::{Category, ContentTypeRegistry, Rating};
use chrono::{DateTime, TimeZone, Utc};
use postwatch_common::time::TimeInterval;
use postwatch_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    CreationAsc,
    #[default]
    CreationDesc,
}

impl OrderBy {
    pub fn from_name(name: &str) -> OrderBy {
        match name {
            "creationAsc" => OrderBy::CreationAsc,
            _ => OrderBy::CreationDesc,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub interval: TimeInterval,
    pub order: OrderBy,
    /// Set when filtering by category
    pub category: Option<Category>,
    /// 0 fetches everything
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchedInsight {
    pub id: i64,
    pub time: DateTime<Utc>,
    pub rating: String,
    pub category: String,
    pub content_type: String,
    pub content: serde_json::Value,
}

pub struct Fetcher {
    pool: SqlitePool,
    registry: Arc<ContentTypeRegistry>,
}

impl Fetcher {
    /// `pool` should be a read-only pool over the master database
    pub fn new(pool: SqlitePool, registry: Arc<ContentTypeRegistry>) -> Fetcher {
        Fetcher { pool, registry }
    }

    pub async fn fetch_insights(&self, options: FetchOptions) -> Result<Vec<FetchedInsight>> {
        let direction = match options.order {
            OrderBy::CreationAsc => "ASC",
            OrderBy::CreationDesc => "DESC",
        };

        let category_filter = match options.category {
            Some(_) => "AND category = ?",
            None => "",
        };

        let limit = match options.max_entries {
            0 => String::new(),
            n => format!("LIMIT {}", n),
        };

        let sql = format!(
            r#"
            SELECT id, time, category, rating, content_type, content
            FROM insights
            WHERE time BETWEEN ? AND ? {}
            ORDER BY time {}, id {}
            {}
            "#,
            category_filter, direction, direction, limit
        );

        let mut query = sqlx::query_as::<_, (i64, i64, i64, i64, i64, String)>(&sql)
            .bind(options.interval.from.timestamp())
            .bind(options.interval.to.timestamp());

        if let Some(category) = options.category {
            query = query.bind(category.as_i64());
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut insights = Vec::with_capacity(rows.len());

        for (id, time, category, rating, content_type_id, raw_content) in rows {
            // rows written by a newer version with unknown content types
            // are skipped rather than failing the whole listing
            let content_type = match self.registry.label_for_id(content_type_id) {
                Ok(label) => label,
                Err(e) => {
                    warn!(insight_id = id, error = %e, "skipping undecodable insight");
                    continue;
                }
            };

            let content = self.registry.decode(content_type_id, &raw_content)?;

            let time = Utc
                .timestamp_opt(time, 0)
                .single()
                .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());

            insights.push(FetchedInsight {
                id,
                time,
                rating: Rating::from_i64(rating).unwrap_or(Rating::Unrated).to_string(),
                category: Category::from_i64(category)
                    .unwrap_or(Category::Local)
                    .to_string(),
                content_type: content_type.to_owned(),
                content,
            });
        }

        Ok(insights)
    }
}
