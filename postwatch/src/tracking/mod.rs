//! Message-lifecycle tracker
//!
//! Correlates the parsed record stream into one [`TrackedResult`] per
//! terminal delivery event, surviving out-of-order arrival, queue
//! re-IDs and crash recovery. A single writer task owns the tracking
//! database; records are batched and committed at tick boundaries
//! (250 ms) or when the batch grows past a size threshold.

pub mod migrations;
pub mod result;

mod actions;
mod dispatch;
mod values;

pub use dispatch::RESULT_INFOS_CAPACITY;
pub use result::{ResultData, ResultEntry, ResultKey, TrackedResult, NUM_RESULT_KEYS};

use postwatch_common::Result;
use postwatch_parser::Record;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// How often a partially accumulated batch is committed
pub const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// A batch past this size is committed immediately
pub const MAX_BATCH_SIZE: usize = 1024;

pub struct Tracker {
    pool: SqlitePool,
    batch_id: i64,
}

impl Tracker {
    /// `pool` must be the exclusive read-write handle of the tracking
    /// database
    pub fn new(pool: SqlitePool) -> Tracker {
        Tracker { pool, batch_id: 0 }
    }

    /// Writer loop. Consumes records until the channel closes or
    /// cancellation is signalled; finalized results leave on `results_tx`.
    pub async fn run(
        mut self,
        mut records: mpsc::Receiver<Record>,
        results_tx: mpsc::Sender<TrackedResult>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        self.redispatch_pending(&results_tx).await?;

        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut pending: Vec<Record> = Vec::new();

        loop {
            tokio::select! {
                maybe_record = records.recv() => match maybe_record {
                    Some(record) => {
                        pending.push(record);
                        if pending.len() >= MAX_BATCH_SIZE {
                            self.commit_batch(&mut pending, &results_tx).await?;
                        }
                    }
                    None => {
                        self.commit_batch(&mut pending, &results_tx).await?;
                        info!("record stream ended; tracker drained");
                        return Ok(());
                    }
                },
                _ = interval.tick() => {
                    if !pending.is_empty() {
                        self.commit_batch(&mut pending, &results_tx).await?;
                    }
                }
                _ = cancel.changed() => {
                    self.commit_batch(&mut pending, &results_tx).await?;
                    info!("tracker cancelled");
                    return Ok(());
                }
            }
        }
    }

    /// Results left in the notification queue by a previous run
    async fn redispatch_pending(&mut self, results_tx: &mpsc::Sender<TrackedResult>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let count = dispatch::drain(&mut tx, &mut self.batch_id, results_tx).await?;
        tx.commit().await?;

        if count > 0 {
            info!(count, "re-dispatched results recovered from a previous run");
        }

        Ok(())
    }

    async fn commit_batch(
        &mut self,
        pending: &mut Vec<Record>,
        results_tx: &mpsc::Sender<TrackedResult>,
    ) -> Result<()> {
        if pending.is_empty() {
            // still drain: a previous batch may have queued results
            let mut tx = self.pool.begin().await?;
            dispatch::drain(&mut tx, &mut self.batch_id, results_tx).await?;
            tx.commit().await?;
            return Ok(());
        }

        let count = pending.len();
        let mut tx = self.pool.begin().await?;

        for record in pending.drain(..) {
            if let Err(e) = actions::apply_record(&mut tx, &record).await {
                // one bad record must not poison the batch
                error!(error = %e, "failed to track record; skipping it");
            }
        }

        dispatch::drain(&mut tx, &mut self.batch_id, results_tx).await?;
        tx.commit().await?;

        debug!(count, "committed tracking batch");
        Ok(())
    }
}
