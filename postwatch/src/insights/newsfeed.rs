//! News feed detector
//!
//! Fetches a remote RSS feed and turns fresh items into unrated news
//! insights. Items are deduplicated by GUID against the news insights
//! already stored within the freshness window. A vendor-namespaced
//! `postwatch:insightDescription` element overrides the generic item
//! description when present.

use super::core::{
    retrieve_last_detector_execution, store_last_detector_execution, Category, Creator, Detector,
    InsightProperties, Rating, Tx,
};
use chrono::{DateTime, Duration, Utc};
use postwatch_common::time::Clock;
use postwatch_common::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const CONTENT_TYPE: &str = "newsfeed_content";
pub const CONTENT_TYPE_ID: i64 = 6;

const EXECUTION_KIND: &str = "newsfeed_last_exec";

const FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub title: String,
    pub description: String,
    pub link: String,
    #[serde(rename = "date_published")]
    pub published: DateTime<Utc>,
    pub guid: String,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub url: String,
    pub update_interval: Duration,
    pub retry_time: Duration,
    pub time_limit: Duration,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            url: "https://postwatch.io/news/feed.rss".to_owned(),
            update_interval: Duration::hours(2),
            retry_time: Duration::minutes(10),
            time_limit: Duration::days(14),
        }
    }
}

pub struct NewsFeedDetector {
    options: Options,
    client: reqwest::Client,
}

impl NewsFeedDetector {
    pub fn new(options: Options) -> Result<NewsFeedDetector> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("building feed client: {}", e)))?;

        Ok(NewsFeedDetector { options, client })
    }
}

#[async_trait::async_trait]
impl Detector for NewsFeedDetector {
    fn name(&self) -> &'static str {
        CONTENT_TYPE
    }

    async fn step(&mut self, clock: &dyn Clock, tx: &mut Tx<'_>, creator: &Creator) -> Result<()> {
        let now = clock.now();

        if let Some(last) = retrieve_last_detector_execution(tx, EXECUTION_KIND).await? {
            if last + self.options.update_interval > now {
                return Ok(());
            }
        }

        info!(url = %self.options.url, "fetching news insights");

        let body = match fetch_body(&self.client, &self.options.url).await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %self.options.url, error = %e, "news feed fetch failed");

                // try again after the retry time instead of the full
                // update interval
                let rewound = now + self.options.retry_time - self.options.update_interval;
                store_last_detector_execution(tx, EXECUTION_KIND, rewound).await?;
                return Ok(());
            }
        };

        let mut items = match parse_feed(&body) {
            Ok(items) => items,
            Err(e) => {
                warn!(url = %self.options.url, error = %e, "news feed did not parse");
                let rewound = now + self.options.retry_time - self.options.update_interval;
                store_last_detector_execution(tx, EXECUTION_KIND, rewound).await?;
                return Ok(());
            }
        };

        items.sort_by_key(|item| item.published);

        process_items(tx, creator, now, self.options.time_limit, items).await?;

        store_last_detector_execution(tx, EXECUTION_KIND, now).await
    }
}

async fn fetch_body(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| Error::Internal(e.to_string()))?;

    response
        .text()
        .await
        .map_err(|e| Error::Internal(e.to_string()))
}

pub(crate) async fn process_items(
    tx: &mut Tx<'_>,
    creator: &Creator,
    now: DateTime<Utc>,
    time_limit: Duration,
    items: Vec<Content>,
) -> Result<()> {
    let oldest_accepted = now - time_limit;

    for item in items {
        if item.published < oldest_accepted {
            continue;
        }

        if insight_already_exists(tx, &item.guid, oldest_accepted).await? {
            continue;
        }

        creator
            .generate_insight(
                tx,
                InsightProperties {
                    time: now,
                    category: Category::News,
                    rating: Rating::Unrated,
                    content_type: CONTENT_TYPE,
                    content: serde_json::to_value(&item)?,
                },
            )
            .await?;
    }

    Ok(())
}

async fn insight_already_exists(
    tx: &mut Tx<'_>,
    guid: &str,
    oldest_accepted: DateTime<Utc>,
) -> Result<bool> {
    let rows: Vec<String> =
        sqlx::query_scalar("SELECT content FROM insights WHERE content_type = ? AND time >= ?")
            .bind(CONTENT_TYPE_ID)
            .bind(oldest_accepted.timestamp())
            .fetch_all(&mut **tx)
            .await?;

    for raw in rows {
        let content: Content = serde_json::from_str(&raw)?;
        if content.guid == guid {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Parse an RSS document into feed items. Items without a GUID or a
/// parseable publication date are dropped.
pub(crate) fn parse_feed(xml: &str) -> Result<Vec<Content>> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| Error::InvalidInput(format!("invalid feed: {}", e)))?;

    let mut items = Vec::new();

    for item in doc.descendants().filter(|n| n.has_tag_name("item")) {
        let text_of = |name: &str| -> Option<String> {
            item.children()
                .find(|c| c.is_element() && c.tag_name().name() == name)
                .and_then(|c| c.text())
                .map(|t| t.trim().to_owned())
        };

        let Some(guid) = text_of("guid") else {
            continue;
        };

        let Some(published) = text_of("pubDate")
            .and_then(|raw| DateTime::parse_from_rfc2822(&raw).ok())
            .map(|t| t.with_timezone(&Utc))
        else {
            continue;
        };

        // the vendor description is meant for the insight card; the
        // generic one is the fallback
        let description = text_of("insightDescription")
            .or_else(|| text_of("description"))
            .unwrap_or_default();

        items.push(Content {
            title: text_of("title").unwrap_or_default(),
            description,
            link: text_of("link").unwrap_or_default(),
            published,
            guid,
        });
    }

    if items.is_empty() {
        return Err(Error::InvalidInput("feed has no usable items".to_owned()));
    }

    Ok(items)
}
