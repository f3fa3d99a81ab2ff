//! Local DNS-blocklist insight detector
//!
//! Periodically asks the checker for a scan of the MTA's own address.
//! A finished scan raises a bad-rated insight only when the listing set
//! differs from the most recent blocklist insight inside the
//! suppression window. A failed scan is retried sooner than the regular
//! interval by rewinding the execution cursor.

use super::core::{
    retrieve_last_detector_execution, store_last_detector_execution, Category, Creator, Detector,
    InsightProperties, Rating, Tx,
};
use crate::localrbl::{Checker, ContentElement, ScanResults};
use chrono::Duration;
use postwatch_common::time::{Clock, TimeInterval};
use postwatch_common::Result;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::info;

pub const CONTENT_TYPE: &str = "local_rbl_check";
pub const CONTENT_TYPE_ID: i64 = 4;

const SCAN_START_KIND: &str = "local_rbl_scan_start";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub scan_interval: TimeInterval,
    pub address: IpAddr,
    pub rbls: Vec<ContentElement>,
}

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub check_interval: Duration,
    pub retry_on_scan_error_interval: Duration,
    pub min_time_to_generate_new_insight: Duration,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            check_interval: Duration::hours(3),
            retry_on_scan_error_interval: Duration::minutes(5),
            min_time_to_generate_new_insight: Duration::hours(12),
        }
    }
}

pub struct LocalRblDetector {
    checker: Arc<dyn Checker>,
    options: Options,
}

impl LocalRblDetector {
    pub fn new(checker: Arc<dyn Checker>, options: Options) -> LocalRblDetector {
        LocalRblDetector { checker, options }
    }

    async fn should_generate(
        &self,
        results: &ScanResults,
        clock: &dyn Clock,
        tx: &mut Tx<'_>,
    ) -> Result<bool> {
        let lookback = clock.now() - self.options.min_time_to_generate_new_insight;

        let last_raw: Option<String> = sqlx::query_scalar(
            r#"
            SELECT content FROM insights
            WHERE time >= ? AND content_type = ?
            ORDER BY time DESC LIMIT 1
            "#,
        )
        .bind(lookback.timestamp())
        .bind(CONTENT_TYPE_ID)
        .fetch_optional(&mut **tx)
        .await?;

        let Some(last_raw) = last_raw else {
            return Ok(true);
        };

        let last: Content = serde_json::from_str(&last_raw)?;

        // both lists are sorted by provider name
        let changed = last.rbls != results.rbls;

        if !changed {
            info!("blocklist scan unchanged since the last insight; not raising");
        }

        Ok(changed)
    }

    async fn maybe_start_new_scan(&self, clock: &dyn Clock, tx: &mut Tx<'_>) -> Result<()> {
        let now = clock.now();

        let last = retrieve_last_detector_execution(tx, SCAN_START_KIND).await?;

        if let Some(last) = last {
            if now <= last + self.options.check_interval {
                return Ok(());
            }
        }

        self.checker.notify_new_scan(now);
        store_last_detector_execution(tx, SCAN_START_KIND, now).await
    }

    /// Rewind the cursor so the next scan starts after the retry
    /// interval instead of the full check interval
    async fn schedule_retry(&self, clock: &dyn Clock, tx: &mut Tx<'_>) -> Result<()> {
        let rewound =
            clock.now() + self.options.retry_on_scan_error_interval - self.options.check_interval;
        store_last_detector_execution(tx, SCAN_START_KIND, rewound).await
    }
}

#[async_trait::async_trait]
impl Detector for LocalRblDetector {
    fn name(&self) -> &'static str {
        CONTENT_TYPE
    }

    async fn step(&mut self, clock: &dyn Clock, tx: &mut Tx<'_>, creator: &Creator) -> Result<()> {
        let Some(results) = self.checker.take_result() else {
            return self.maybe_start_new_scan(clock, tx).await;
        };

        if results.error.is_some() {
            return self.schedule_retry(clock, tx).await;
        }

        if !self.should_generate(&results, clock, tx).await? {
            return Ok(());
        }

        creator
            .generate_insight(
                tx,
                InsightProperties {
                    time: clock.now(),
                    category: Category::Local,
                    rating: Rating::Bad,
                    content_type: CONTENT_TYPE,
                    content: serde_json::to_value(Content {
                        scan_interval: results.interval,
                        address: self.checker.checked_ip(),
                        rbls: results.rbls,
                    })?,
                },
            )
            .await?;

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
                        scan_interval: TimeInterval {
                            from: now,
                            to: now + Duration::seconds(30),
                        },
                        address: self.checker.checked_ip(),
                        rbls: vec![
                            ContentElement {
                                rbl: "rbl.example.com".into(),
                                text: "listed for testing".into(),
                            },
                            ContentElement {
                                rbl: "other-rbl.example.de".into(),
                                text: "another reason".into(),
                            },
                        ],
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
    use crate::insights::core::{default_decoder, ContentTypeRegistry};
    use crate::insights::migrations::MIGRATIONS;
    use crate::notification::{Center, Policies};
    use chrono::{DateTime, TimeZone, Utc};
    use postwatch_common::db::{run_migrations, ConnPair};
    use postwatch_common::time::FakeClock;
    use std::sync::Mutex;

    struct FakeChecker {
        pending: Mutex<Option<ScanResults>>,
        scans_requested: Mutex<Vec<DateTime<Utc>>>,
    }

    impl FakeChecker {
        fn new() -> Arc<FakeChecker> {
            Arc::new(FakeChecker {
                pending: Mutex::new(None),
                scans_requested: Mutex::new(Vec::new()),
            })
        }

        fn push_result(&self, results: ScanResults) {
            *self.pending.lock().unwrap() = Some(results);
        }
    }

    impl Checker for FakeChecker {
        fn checked_ip(&self) -> IpAddr {
            "10.20.30.40".parse().unwrap()
        }

        fn notify_new_scan(&self, now: DateTime<Utc>) {
            self.scans_requested.lock().unwrap().push(now);
        }

        fn take_result(&self) -> Option<ScanResults> {
            self.pending.lock().unwrap().take()
        }
    }

    struct Fixture {
        master: ConnPair,
        checker: Arc<FakeChecker>,
        detector: LocalRblDetector,
        creator: Creator,
    }

    async fn setup() -> Fixture {
        let master = ConnPair::open_in_memory().await.unwrap();
        run_migrations(master.write(), "master", MIGRATIONS).await.unwrap();

        let mut registry = ContentTypeRegistry::new();
        registry.register(CONTENT_TYPE, CONTENT_TYPE_ID, default_decoder::<Content>);
        let center = Arc::new(Center::with_fixed_language("en", Policies::default(), vec![]));
        let creator = Creator::new(Arc::new(registry), center);

        let checker = FakeChecker::new();
        let detector = LocalRblDetector::new(checker.clone(), Options::default());

        Fixture {
            master,
            checker,
            detector,
            creator,
        }
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

    async fn insight_count(fixture: &Fixture) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM insights")
            .fetch_one(fixture.master.read())
            .await
            .unwrap()
    }

    fn listing(clock: &FakeClock, rbls: &[(&str, &str)]) -> ScanResults {
        ScanResults {
            interval: TimeInterval {
                from: clock.now() - Duration::seconds(30),
                to: clock.now(),
            },
            rbls: rbls
                .iter()
                .map(|(rbl, text)| ContentElement {
                    rbl: rbl.to_string(),
                    text: text.to_string(),
                })
                .collect(),
            error: None,
        }
    }

    #[tokio::test]
    async fn without_results_a_scan_is_requested_at_most_once_per_interval() {
        let mut fixture = setup().await;
        let clock = FakeClock::new(Utc.with_ymd_and_hms(2020, 6, 16, 12, 0, 0).unwrap());

        step(&mut fixture, &clock).await;
        clock.advance(Duration::minutes(1));
        step(&mut fixture, &clock).await;

        assert_eq!(fixture.checker.scans_requested.lock().unwrap().len(), 1);

        clock.advance(Duration::hours(4));
        step(&mut fixture, &clock).await;
        assert_eq!(fixture.checker.scans_requested.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn a_listing_raises_an_insight() {
        let mut fixture = setup().await;
        let clock = FakeClock::new(Utc.with_ymd_and_hms(2020, 6, 16, 12, 0, 0).unwrap());

        fixture.checker.push_result(listing(&clock, &[("zen.spamhaus.org", "listed")]));
        step(&mut fixture, &clock).await;

        assert_eq!(insight_count(&fixture).await, 1);
    }

    #[tokio::test]
    async fn unchanged_listing_does_not_raise_again() {
        let mut fixture = setup().await;
        let clock = FakeClock::new(Utc.with_ymd_and_hms(2020, 6, 16, 12, 0, 0).unwrap());

        fixture.checker.push_result(listing(&clock, &[("zen.spamhaus.org", "listed")]));
        step(&mut fixture, &clock).await;

        clock.advance(Duration::hours(1));
        fixture.checker.push_result(listing(&clock, &[("zen.spamhaus.org", "listed")]));
        step(&mut fixture, &clock).await;

        assert_eq!(insight_count(&fixture).await, 1);

        // a different listing set does raise
        clock.advance(Duration::hours(1));
        fixture.checker.push_result(listing(
            &clock,
            &[("bl.spamcop.net", "also listed"), ("zen.spamhaus.org", "listed")],
        ));
        step(&mut fixture, &clock).await;

        assert_eq!(insight_count(&fixture).await, 2);
    }

    #[tokio::test]
    async fn scan_error_schedules_an_earlier_retry() {
        let mut fixture = setup().await;
        let clock = FakeClock::new(Utc.with_ymd_and_hms(2020, 6, 16, 12, 0, 0).unwrap());

        fixture.checker.push_result(ScanResults {
            interval: TimeInterval {
                from: clock.now(),
                to: clock.now(),
            },
            rbls: vec![],
            error: Some("all blocklist lookups failed".into()),
        });
        step(&mut fixture, &clock).await;
        assert_eq!(insight_count(&fixture).await, 0);

        // the retry window is much shorter than the full check interval
        clock.advance(Duration::minutes(6));
        step(&mut fixture, &clock).await;
        assert_eq!(fixture.checker.scans_requested.lock().unwrap().len(), 1);
    }
}
