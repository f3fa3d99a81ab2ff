//! Import progress announcements
//!
//! When historical logs are imported, downstream consumers (most notably
//! the insight engine's historical replay) need to know how far along the
//! import is, in log time. Progress is quantized into at most 100
//! notches.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub finished: bool,
    pub time: DateTime<Utc>,
    /// 0..=100
    pub progress: i64,
}

/// Progress publisher handed to the log reader. A skipping announcer
/// drops everything; it is used on every run after the first import.
pub struct Announcer {
    tx: Option<mpsc::Sender<Progress>>,
}

impl Announcer {
    pub fn new(tx: mpsc::Sender<Progress>) -> Announcer {
        Announcer { tx: Some(tx) }
    }

    pub fn skipper() -> Announcer {
        Announcer { tx: None }
    }

    pub async fn announce_start(&mut self, time: DateTime<Utc>) {
        info!(%time, "import started");
        self.send(Progress {
            finished: false,
            time,
            progress: 0,
        })
        .await;
    }

    pub async fn announce_progress(&mut self, progress: Progress) {
        self.send(progress).await;
    }

    pub async fn announce_end(&mut self, time: DateTime<Utc>) {
        info!(%time, "import finished");
        self.send(Progress {
            finished: true,
            time,
            progress: 100,
        })
        .await;
    }

    async fn send(&mut self, progress: Progress) {
        if let Some(tx) = &self.tx {
            // a gone consumer just means nobody cares about progress
            if tx.send(progress).await.is_err() {
                self.tx = None;
            }
        }
    }
}
