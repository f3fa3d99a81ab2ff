//! Workspace wiring
//!
//! The workspace owns the three embedded databases
//! (`master.db`, `logtracker.db`, `logs.db`), runs their migrations at
//! startup, and wires the long-lived tasks together: tracker writer,
//! delivery writer and insight engine. Each database has exactly one
//! writing task; reads go through the per-database read pools.

use crate::dashboard::Dashboard;
use crate::deliverydb::{self, DeliveryDb};
use crate::insights::{
    self, localrbl as localrbl_insight, mailinactivity, newsfeed, welcome, ContentTypeRegistry,
    Creator, Detector, Engine, Fetcher,
};
use crate::localrbl::{Checker, DnsChecker};
use crate::logsource::Progress;
use crate::notification::{
    email::EmailNotifier, webhook::WebhookNotifier, Center, Policies, SettingsPolicy,
};
use crate::tracking::{self, TrackedResult, Tracker};
use chrono::{DateTime, TimeZone, Utc};
use postwatch_common::db::{run_migrations, ConnPair, Migration};
use postwatch_common::meta::{self, MetaHandler};
use postwatch_common::Result;
use postwatch_parser::Record;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::warn;

pub const MASTER_DATABASE_NAME: &str = "master";

/// Capacity of the finalized-results channel between the tracker and
/// the delivery writer
const RESULTS_CHANNEL_CAPACITY: usize = 1024;

/// All migrations of the master database, in order
pub fn master_migrations() -> Vec<Migration> {
    let mut migrations = Vec::new();
    migrations.extend_from_slice(meta::MIGRATIONS);
    migrations.extend_from_slice(insights::migrations::MIGRATIONS);
    migrations.extend_from_slice(crate::auth::MIGRATIONS);
    migrations
}

/// Migration list for a logical database name, for the migrate-down
/// admin command
pub fn migrations_for_database(name: &str) -> Option<Vec<Migration>> {
    match name {
        MASTER_DATABASE_NAME => Some(master_migrations()),
        tracking::migrations::DATABASE_NAME => Some(tracking::migrations::MIGRATIONS.to_vec()),
        deliverydb::migrations::DATABASE_NAME => Some(deliverydb::migrations::MIGRATIONS.to_vec()),
        _ => None,
    }
}

/// Join handles of the spawned pipeline tasks. The tracker and delivery
/// writers end when their input channels drain; the engine runs until
/// cancelled.
pub struct PipelineHandles {
    pub tracker: JoinHandle<Result<()>>,
    pub delivery: JoinHandle<Result<()>>,
    pub engine: JoinHandle<Result<()>>,
}

pub struct Workspace {
    master: ConnPair,
    tracking: ConnPair,
    logs: ConnPair,
    pub meta: MetaHandler,
    pub registry: Arc<ContentTypeRegistry>,
    pub dashboard: Dashboard,
    pub fetcher: Arc<Fetcher>,
    center: Arc<Center>,
}

impl Workspace {
    pub async fn open(directory: &Path) -> Result<Workspace> {
        std::fs::create_dir_all(directory)?;

        let master = ConnPair::open(&directory.join("master.db")).await?;
        run_migrations(master.write(), MASTER_DATABASE_NAME, &master_migrations()).await?;

        let tracking_db = ConnPair::open(&directory.join("logtracker.db")).await?;
        run_migrations(
            tracking_db.write(),
            tracking::migrations::DATABASE_NAME,
            tracking::migrations::MIGRATIONS,
        )
        .await?;

        let logs = ConnPair::open(&directory.join("logs.db")).await?;
        run_migrations(
            logs.write(),
            deliverydb::migrations::DATABASE_NAME,
            deliverydb::migrations::MIGRATIONS,
        )
        .await?;

        // the registry is the single startup barrier: everything that
        // decodes insight content comes after this point
        let registry = insights::default_registry();

        let meta = MetaHandler::new(master.clone());

        let center = Arc::new(Center::new(
            meta.clone(),
            Policies::new(vec![Arc::new(SettingsPolicy::new(meta.clone()))]),
            vec![
                Arc::new(EmailNotifier::new(meta.clone())),
                Arc::new(WebhookNotifier::new(meta.clone())?),
            ],
        ));

        let dashboard = Dashboard::new(logs.read().clone());
        let fetcher = Arc::new(Fetcher::new(master.read().clone(), registry.clone()));

        Ok(Workspace {
            master,
            tracking: tracking_db,
            logs,
            meta,
            registry,
            dashboard,
            fetcher,
            center,
        })
    }

    /// Most recent time seen in the delivery database, used to decide
    /// whether this is the first import
    pub async fn most_recent_log_time(&self) -> Result<Option<DateTime<Utc>>> {
        let ts = DeliveryDb::new(self.logs.write().clone())
            .most_recent_delivery_time()
            .await?;
        Ok(ts.and_then(|ts| Utc.timestamp_opt(ts, 0).single()))
    }

    /// Spawn the long-lived pipeline tasks. Records flow in on
    /// `records`, import progress on `import`; everything stops when
    /// `cancel` fires or the upstream channels close.
    pub async fn run(
        &self,
        records: mpsc::Receiver<Record>,
        import: mpsc::Receiver<Progress>,
        cancel: watch::Receiver<bool>,
    ) -> Result<PipelineHandles> {
        let (results_tx, results_rx) =
            mpsc::channel::<TrackedResult>(RESULTS_CHANNEL_CAPACITY);

        let tracker = Tracker::new(self.tracking.write().clone());
        let tracker_handle = tokio::spawn(tracker.run(records, results_tx, cancel.clone()));

        let delivery = DeliveryDb::new(self.logs.write().clone());
        let delivery_handle = tokio::spawn(delivery.run(results_rx, cancel.clone()));

        let engine = Engine::new(
            self.master.write().clone(),
            Creator::new(self.registry.clone(), self.center.clone()),
            self.build_detectors().await?,
        )
        .await?;
        let engine_handle = tokio::spawn(engine.run(import, cancel));

        Ok(PipelineHandles {
            tracker: tracker_handle,
            delivery: delivery_handle,
            engine: engine_handle,
        })
    }

    /// Exclusive writer of the master database, for admin operations
    pub fn master_pool(&self) -> &sqlx::SqlitePool {
        self.master.write()
    }

    async fn build_detectors(&self) -> Result<Vec<Box<dyn Detector>>> {
        let checked_ip = self.checked_ip().await;

        let checker: Arc<dyn Checker> = DnsChecker::start(crate::localrbl::Options {
            checked_ip,
            ..crate::localrbl::Options::default()
        })?;

        Ok(vec![
            Box::new(mailinactivity::MailInactivityDetector::new(
                self.dashboard.clone(),
                mailinactivity::Options::default(),
            )),
            Box::new(welcome::WelcomeDetector),
            Box::new(localrbl_insight::LocalRblDetector::new(
                checker,
                localrbl_insight::Options::default(),
            )),
            Box::new(newsfeed::NewsFeedDetector::new(newsfeed::Options::default())?),
        ])
    }

    /// Address scanned by the blocklist checker, configurable via
    /// metadata; loopback until the operator sets one
    async fn checked_ip(&self) -> IpAddr {
        let configured: Option<String> = match self.meta.retrieve_json("checked_ip").await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "could not read checked_ip setting");
                None
            }
        };

        configured
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_else(|| IpAddr::from([127, 0, 0, 1]))
    }

    pub async fn close(&self) {
        self.master.close().await;
        self.tracking.close().await;
        self.logs.close().await;
    }
}
