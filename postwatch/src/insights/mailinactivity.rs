//! Mail inactivity detector
//!
//! Raises a bad-rated insight when the current lookup window saw no
//! deliveries while the previous one did. After the first raise, new
//! ones require at least the configured generation interval to have
//! elapsed and the current window to still be empty.

use super::core::{
    retrieve_last_detector_execution, store_last_detector_execution, Category, Creator, Detector,
    InsightProperties, Rating, Tx,
};
use crate::dashboard::Dashboard;
use chrono::Duration;
use postwatch_common::time::{Clock, TimeInterval};
use postwatch_common::Result;
use serde::{Deserialize, Serialize};

pub const CONTENT_TYPE: &str = "mail_inactivity";
pub const CONTENT_TYPE_ID: i64 = 0;

const EXECUTION_KIND: &str = "mail_inactivity";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub interval: TimeInterval,
}

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub lookup_range: Duration,
    pub min_time_generation_interval: Duration,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            lookup_range: Duration::hours(24),
            min_time_generation_interval: Duration::hours(12),
        }
    }
}

pub struct MailInactivityDetector {
    dashboard: Dashboard,
    options: Options,
}

impl MailInactivityDetector {
    pub fn new(dashboard: Dashboard, options: Options) -> MailInactivityDetector {
        MailInactivityDetector { dashboard, options }
    }

    async fn total_activity(&self, interval: TimeInterval) -> Result<i64> {
        let pairs = self.dashboard.delivery_status(interval).await?;
        Ok(pairs.iter().map(|p| p.value).sum())
    }
}

#[async_trait::async_trait]
impl Detector for MailInactivityDetector {
    fn name(&self) -> &'static str {
        CONTENT_TYPE
    }

    fn is_historical(&self) -> bool {
        true
    }

    async fn step(&mut self, clock: &dyn Clock, tx: &mut Tx<'_>, creator: &Creator) -> Result<()> {
        let now = clock.now();

        let last_execution = retrieve_last_detector_execution(tx, EXECUTION_KIND).await?;

        let interval = TimeInterval {
            from: now - self.options.lookup_range,
            to: now,
        };

        // first execution checks right away; afterwards wait out the
        // generation interval
        if let Some(last) = last_execution {
            if now - last < self.options.min_time_generation_interval {
                return Ok(());
            }
        }

        let total_current = self.total_activity(interval).await?;

        if total_current > 0 {
            return Ok(());
        }

        if last_execution.is_none() {
            // never raised before: only meaningful when mail did flow in
            // the previous window
            let previous = TimeInterval {
                from: interval.from - self.options.lookup_range,
                to: interval.to - self.options.lookup_range,
            };

            if self.total_activity(previous).await? == 0 {
                return Ok(());
            }
        }

        creator
            .generate_insight(
                tx,
                InsightProperties {
                    time: now,
                    category: Category::Local,
                    rating: Rating::Bad,
                    content_type: CONTENT_TYPE,
                    content: serde_json::to_value(Content { interval })?,
                },
            )
            .await?;

        store_last_detector_execution(tx, EXECUTION_KIND, now).await?;

        Ok(())
    }

    async fn generate_sample_insight(
        &self,
        clock: &dyn Clock,
        tx: &mut Tx<'_>,
        creator: &Creator,
    ) -> Result<()> {
        let now = clock.now();
        creator
            .generate_insight(
                tx,
                InsightProperties {
                    time: now,
                    category: Category::Local,
                    rating: Rating::Bad,
                    content_type: CONTENT_TYPE,
                    content: serde_json::to_value(Content {
                        interval: TimeInterval {
                            from: now - Duration::hours(24),
                            to: now,
                        },
                    })?,
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deliverydb::migrations as delivery_migrations;
    use crate::insights::core::{default_decoder, ContentTypeRegistry};
    use crate::insights::migrations::MIGRATIONS;
    use crate::notification::{Center, Policies};
    use chrono::{TimeZone, Utc};
    use postwatch_common::db::{run_migrations, ConnPair};
    use postwatch_common::time::FakeClock;
    use std::sync::Arc;

    struct Fixture {
        master: ConnPair,
        logs: ConnPair,
        detector: MailInactivityDetector,
        creator: Creator,
    }

    async fn setup() -> Fixture {
        let master = ConnPair::open_in_memory().await.unwrap();
        run_migrations(master.write(), "master", MIGRATIONS).await.unwrap();

        let logs = ConnPair::open_in_memory().await.unwrap();
        run_migrations(
            logs.write(),
            delivery_migrations::DATABASE_NAME,
            delivery_migrations::MIGRATIONS,
        )
        .await
        .unwrap();

        let mut registry = ContentTypeRegistry::new();
        registry.register(CONTENT_TYPE, CONTENT_TYPE_ID, default_decoder::<Content>);
        let center = Arc::new(Center::with_fixed_language("en", Policies::default(), vec![]));
        let creator = Creator::new(Arc::new(registry), center);

        let detector = MailInactivityDetector::new(
            Dashboard::new(logs.read().clone()),
            Options {
                lookup_range: Duration::hours(1),
                min_time_generation_interval: Duration::hours(8),
            },
        );

        Fixture {
            master,
            logs,
            detector,
            creator,
        }
    }

    async fn insert_delivery(fixture: &Fixture, ts: i64) {
        sqlx::query(
            "INSERT INTO deliveries (status, delivery_ts, direction, delivery_server_id) VALUES (0, ?, 0, 1)",
        )
        .bind(ts)
        .execute(fixture.logs.write())
        .await
        .unwrap();
    }

    async fn insight_count(fixture: &Fixture) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM insights")
            .fetch_one(fixture.master.read())
            .await
            .unwrap()
    }

    async fn step(fixture: &mut Fixture, clock: &FakeClock) {
        let mut tx = fixture.master.write().begin().await.unwrap();
        fixture
            .detector
            .step(clock, &mut tx, &fixture.creator)
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn raises_once_when_mail_stops_flowing() {
        let mut fixture = setup().await;

        let now = Utc.with_ymd_and_hms(2020, 6, 16, 13, 0, 0).unwrap();
        let clock = FakeClock::new(now);

        // 60 messages spread over the previous window, silence in the
        // current one
        for i in 0..30 {
            insert_delivery(&fixture, (now - Duration::minutes(90)).timestamp() + i).await;
            insert_delivery(&fixture, (now - Duration::minutes(70)).timestamp() + i).await;
        }

        step(&mut fixture, &clock).await;
        assert_eq!(insight_count(&fixture).await, 1);

        // stepping again within the generation interval stays quiet
        clock.advance(Duration::minutes(10));
        step(&mut fixture, &clock).await;
        assert_eq!(insight_count(&fixture).await, 1);
    }

    #[tokio::test]
    async fn no_traffic_at_all_never_raises() {
        let mut fixture = setup().await;
        let clock = FakeClock::new(Utc.with_ymd_and_hms(2020, 6, 16, 12, 0, 0).unwrap());

        step(&mut fixture, &clock).await;
        clock.advance(Duration::hours(9));
        step(&mut fixture, &clock).await;

        assert_eq!(insight_count(&fixture).await, 0);
    }

    #[tokio::test]
    async fn active_current_window_never_raises() {
        let mut fixture = setup().await;
        let now = Utc.with_ymd_and_hms(2020, 6, 16, 12, 0, 0).unwrap();
        let clock = FakeClock::new(now);

        insert_delivery(&fixture, (now - Duration::minutes(30)).timestamp()).await;

        step(&mut fixture, &clock).await;
        assert_eq!(insight_count(&fixture).await, 0);
    }
}
