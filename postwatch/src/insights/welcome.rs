//! Welcome insight
//!
//! Greets the user on the very first engine run with a single unrated
//! insight pointing at the dashboard. Gated by the execution cursor so
//! it fires exactly once per workspace.

use super::core::{
    retrieve_last_detector_execution, store_last_detector_execution, Category, Creator, Detector,
    InsightProperties, Rating, Tx,
};
use postwatch_common::time::Clock;
use postwatch_common::Result;
use serde::{Deserialize, Serialize};

pub const CONTENT_TYPE: &str = "welcome_content";
pub const CONTENT_TYPE_ID: i64 = 2;

const EXECUTION_KIND: &str = "welcome_insight";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {}

pub struct WelcomeDetector;

#[async_trait::async_trait]
impl Detector for WelcomeDetector {
    fn name(&self) -> &'static str {
        CONTENT_TYPE
    }

    async fn step(&mut self, clock: &dyn Clock, tx: &mut Tx<'_>, creator: &Creator) -> Result<()> {
        if retrieve_last_detector_execution(tx, EXECUTION_KIND).await?.is_some() {
            return Ok(());
        }

        let now = clock.now();

        creator
            .generate_insight(
                tx,
                InsightProperties {
                    time: now,
                    category: Category::Local,
                    rating: Rating::Unrated,
                    content_type: CONTENT_TYPE,
                    content: serde_json::to_value(Content {})?,
                },
            )
            .await?;

        store_last_detector_execution(tx, EXECUTION_KIND, now).await
    }
}
