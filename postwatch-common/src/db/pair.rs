//! Read-write / read-only connection pairs
//!
//! Every logical database has exactly one writer at any time, so the
//! read-write side is a pool capped at a single connection; handing it to
//! the owning task makes the serialization explicit. Reads go through a
//! separate read-only pool.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Number of read-only connections kept per database
const READ_POOL_SIZE: u32 = 5;

/// Paired connections over one SQLite file
#[derive(Debug, Clone)]
pub struct ConnPair {
    rw: SqlitePool,
    ro: SqlitePool,
}

impl ConnPair {
    /// Open (creating if needed) a database file with WAL journaling
    pub async fn open(path: &Path) -> Result<ConnPair> {
        let newly_created = !path.exists();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let base = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(false);

        let rw = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(base.clone().create_if_missing(true))
            .await?;

        let ro = SqlitePoolOptions::new()
            .max_connections(READ_POOL_SIZE)
            .connect_with(base.read_only(true))
            .await?;

        if newly_created {
            info!("Initialized new database: {}", path.display());
        } else {
            info!("Opened existing database: {}", path.display());
        }

        Ok(ConnPair { rw, ro })
    }

    /// In-memory pair for tests. Reader and writer share the same pool,
    /// since a private in-memory database is not visible across
    /// connections.
    pub async fn open_in_memory() -> Result<ConnPair> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Ok(ConnPair {
            rw: pool.clone(),
            ro: pool,
        })
    }

    /// The exclusive writer pool (one connection)
    pub fn write(&self) -> &SqlitePool {
        &self.rw
    }

    /// The read-only pool
    pub fn read(&self) -> &SqlitePool {
        &self.ro
    }

    pub async fn close(&self) {
        self.rw.close().await;
        self.ro.close().await;
    }
}
