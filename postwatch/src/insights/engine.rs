//! Insight engine
//!
//! A single writer task ticks every second. Each tick opens one write
//! transaction on the master database and calls every detector's `step`
//! in registration order; a detector error aborts the whole transaction,
//! is logged, and the engine moves on to the next tick.
//!
//! On the first run, historical detectors are replayed over imported
//! data before wall-clock ticking starts: the import announcer's
//! progress notches drive a fake clock through log time.

use super::core::{Creator, Detector};
use crate::logsource::Progress;
use postwatch_common::time::{Clock, FakeClock, WallClock};
use postwatch_common::Result;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

pub struct Engine {
    pool: SqlitePool,
    detectors: Vec<Box<dyn Detector>>,
    creator: Creator,
}

impl Engine {
    /// `pool` must be the exclusive read-write handle of the master
    /// database. Runs every detector's `setup` before returning.
    pub async fn new(
        pool: SqlitePool,
        creator: Creator,
        mut detectors: Vec<Box<dyn Detector>>,
    ) -> Result<Engine> {
        let mut tx = pool.begin().await?;
        for detector in &mut detectors {
            detector.setup(&mut tx).await?;
        }
        tx.commit().await?;

        let engine = Engine {
            pool,
            detectors,
            creator,
        };

        #[cfg(feature = "dev_sample_insights")]
        engine.seed_sample_insights().await?;

        Ok(engine)
    }

    /// Seed one insight per detector, for frontend development
    #[cfg(feature = "dev_sample_insights")]
    async fn seed_sample_insights(&self) -> Result<()> {
        let clock = WallClock;
        let mut tx = self.pool.begin().await?;
        for detector in &self.detectors {
            detector
                .generate_sample_insight(&clock, &mut tx, &self.creator)
                .await?;
        }
        tx.commit().await?;

        info!("seeded sample insights");
        Ok(())
    }

    pub async fn run(
        mut self,
        import: mpsc::Receiver<Progress>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        self.replay_historical(import, &mut cancel).await?;

        let clock = WallClock;
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.step_all(&clock, false).await?;
                }
                _ = cancel.changed() => {
                    info!("insight engine cancelled");
                    break;
                }
            }
        }

        for detector in &mut self.detectors {
            detector.close().await?;
        }

        Ok(())
    }

    /// Drive the historical detectors through imported log time
    async fn replay_historical(
        &mut self,
        mut import: mpsc::Receiver<Progress>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        if !self.detectors.iter().any(|d| d.is_historical()) {
            // still need to drain, so the announcer never blocks
            while import.recv().await.is_some() {}
            return Ok(());
        }

        let clock = FakeClock::new(chrono::DateTime::<chrono::Utc>::MIN_UTC);

        loop {
            tokio::select! {
                maybe_progress = import.recv() => match maybe_progress {
                    Some(progress) => {
                        clock.set(progress.time);
                        self.step_all(&clock, true).await?;

                        if progress.finished {
                            info!("historical insight replay finished");
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                },
                _ = cancel.changed() => return Ok(()),
            }
        }
    }

    /// One tick: every detector under a single write transaction
    async fn step_all(&mut self, clock: &dyn Clock, historical_only: bool) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for detector in &mut self.detectors {
            if historical_only && !detector.is_historical() {
                continue;
            }

            if let Err(e) = detector.step(clock, &mut tx, &self.creator).await {
                error!(detector = detector.name(), error = %e, "detector step failed; aborting tick");
                tx.rollback().await?;
                return Ok(());
            }
        }

        tx.commit().await?;
        debug!("insight tick committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::core::{
        default_decoder, Category, ContentTypeRegistry, InsightProperties, Rating, Tx,
    };
    use crate::insights::fetcher::{FetchOptions, Fetcher, OrderBy};
    use crate::insights::migrations::MIGRATIONS;
    use crate::notification::{Center, Notification, Notifier, Policies};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use postwatch_common::db::{run_migrations, ConnPair};
    use postwatch_common::time::TimeInterval;
    use serde::{Deserialize, Serialize};
    use std::sync::{Arc, Mutex};

    #[derive(Serialize, Deserialize)]
    struct FakeContent {
        title: String,
    }

    struct RecordingNotifier {
        received: Mutex<Vec<Notification>>,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn notify(&self, n: &Notification, _language: &str) -> Result<()> {
            self.received.lock().unwrap().push(n.clone());
            Ok(())
        }
    }

    struct FakeDetector {
        pending: Arc<Mutex<Option<(Category, Rating, String)>>>,
    }

    #[async_trait::async_trait]
    impl Detector for FakeDetector {
        fn name(&self) -> &'static str {
            "fake_insight_type"
        }

        async fn step(
            &mut self,
            clock: &dyn Clock,
            tx: &mut Tx<'_>,
            creator: &Creator,
        ) -> Result<()> {
            let Some((category, rating, title)) = self.pending.lock().unwrap().take() else {
                return Ok(());
            };

            creator
                .generate_insight(
                    tx,
                    InsightProperties {
                        time: clock.now(),
                        category,
                        rating,
                        content_type: "fake_insight_type",
                        content: serde_json::to_value(FakeContent { title }).unwrap(),
                    },
                )
                .await?;

            Ok(())
        }
    }

    fn registry() -> Arc<ContentTypeRegistry> {
        let mut r = ContentTypeRegistry::new();
        r.register("fake_insight_type", 200, default_decoder::<FakeContent>);
        Arc::new(r)
    }

    async fn setup() -> (ConnPair, Arc<RecordingNotifier>, Engine, Arc<Mutex<Option<(Category, Rating, String)>>>) {
        let pair = ConnPair::open_in_memory().await.unwrap();
        run_migrations(pair.write(), "master", MIGRATIONS).await.unwrap();

        let notifier = Arc::new(RecordingNotifier {
            received: Mutex::new(Vec::new()),
        });
        let center = Arc::new(Center::with_fixed_language(
            "en",
            Policies::default(),
            vec![notifier.clone()],
        ));

        let registry = registry();
        let creator = Creator::new(registry.clone(), center);

        let pending = Arc::new(Mutex::new(None));
        let detector = FakeDetector {
            pending: pending.clone(),
        };

        let engine = Engine::new(pair.write().clone(), creator, vec![Box::new(detector)])
            .await
            .unwrap();

        (pair, notifier, engine, pending)
    }

    #[tokio::test]
    async fn generates_insights_and_notifies_only_bad_ratings() {
        let (pair, notifier, mut engine, pending) = setup().await;

        let clock = FakeClock::new(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap());

        let mut step_with = |value: Option<(Category, Rating, &str)>| {
            *pending.lock().unwrap() =
                value.map(|(c, r, t)| (c, r, t.to_owned()));
            clock.advance(ChronoDuration::seconds(1));
        };

        // two idle ticks, then three insights with mixed ratings
        for value in [
            None,
            None,
            Some((Category::Local, Rating::Bad, "42")),
            Some((Category::Intel, Rating::Ok, "35")),
            Some((Category::Comparative, Rating::Bad, "13")),
        ] {
            step_with(value);
            engine.step_all(&clock, false).await.unwrap();
        }

        // only the two bad-rated insights were notified, in creation order
        let received = notifier.received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].id, 1);
        assert_eq!(received[1].id, 3);

        // all three rows exist and fetch in reverse creation order
        let fetcher = Fetcher::new(pair.read().clone(), registry());
        let fetched = fetcher
            .fetch_insights(FetchOptions {
                interval: TimeInterval {
                    from: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
                    to: Utc.with_ymd_and_hms(2000, 1, 1, 1, 0, 0).unwrap(),
                },
                order: OrderBy::CreationDesc,
                category: None,
                max_entries: 0,
            })
            .await
            .unwrap();

        assert_eq!(fetched.len(), 3);
        assert_eq!(fetched[0].id, 3);
        assert_eq!(fetched[1].id, 2);
        assert_eq!(fetched[2].id, 1);
        assert_eq!(fetched[0].category, "comparative");
        assert_eq!(fetched[1].rating, "ok");
        assert_eq!(fetched[2].content["title"], "42");
    }

    #[tokio::test]
    async fn category_filter_and_entry_limit() {
        let (pair, _notifier, mut engine, pending) = setup().await;
        let clock = FakeClock::new(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap());

        for (category, title) in [
            (Category::Local, "a"),
            (Category::News, "b"),
            (Category::Local, "c"),
        ] {
            *pending.lock().unwrap() = Some((category, Rating::Unrated, title.to_owned()));
            clock.advance(ChronoDuration::seconds(1));
            engine.step_all(&clock, false).await.unwrap();
        }

        let fetcher = Fetcher::new(pair.read().clone(), registry());
        let interval = TimeInterval {
            from: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2000, 1, 1, 1, 0, 0).unwrap(),
        };

        let local_only = fetcher
            .fetch_insights(FetchOptions {
                interval,
                order: OrderBy::CreationAsc,
                category: Some(Category::Local),
                max_entries: 0,
            })
            .await
            .unwrap();
        assert_eq!(local_only.len(), 2);
        assert!(local_only.iter().all(|i| i.category == "local"));

        let limited = fetcher
            .fetch_insights(FetchOptions {
                interval,
                order: OrderBy::CreationAsc,
                category: None,
                max_entries: 2,
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].id, 1);
    }
}
