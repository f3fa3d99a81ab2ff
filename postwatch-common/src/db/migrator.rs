//! Database schema migrations
//!
//! Each logical database declares an ordered list of named migrations.
//! Applied migrations are tracked per `(database_name, migration_name)`
//! pair in a `_migrations` table, so re-running the list at startup only
//! applies what is missing.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - they must remain stable for
//!    users upgrading from older versions
//! 2. **Always add new migrations** - append a new entry for each schema
//!    change
//! 3. **Provide a down script** - `run_migrations_down_to` rolls a
//!    database back to a given version from the command line

use crate::{Error, Result};
use sqlx::SqlitePool;
use tracing::info;

/// One named schema migration. `up` and `down` are lists of single SQL
/// statements executed in order inside one transaction.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub name: &'static str,
    pub up: &'static [&'static str],
    pub down: &'static [&'static str],
}

async fn create_migrations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY,
            database_name TEXT NOT NULL,
            migration_name TEXT NOT NULL,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (database_name, migration_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn is_applied(pool: &SqlitePool, database_name: &str, migration_name: &str) -> Result<bool> {
    let applied: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM _migrations WHERE database_name = ? AND migration_name = ?)",
    )
    .bind(database_name)
    .bind(migration_name)
    .fetch_one(pool)
    .await?;

    Ok(applied)
}

/// Run all pending migrations for one database, ascending
pub async fn run_migrations(
    pool: &SqlitePool,
    database_name: &str,
    migrations: &[Migration],
) -> Result<()> {
    create_migrations_table(pool).await?;

    let mut applied_count = 0;

    for migration in migrations {
        if is_applied(pool, database_name, migration.name).await? {
            continue;
        }

        let mut tx = pool.begin().await?;

        for statement in migration.up {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        sqlx::query("INSERT INTO _migrations (database_name, migration_name) VALUES (?, ?)")
            .bind(database_name)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!("{}: applied migration {}", database_name, migration.name);
        applied_count += 1;
    }

    if applied_count == 0 {
        info!("{}: database schema is up to date", database_name);
    }

    Ok(())
}

/// Roll a database back so that only the first `version` migrations remain
/// applied. `version = 0` reverts everything.
pub async fn run_migrations_down_to(
    pool: &SqlitePool,
    database_name: &str,
    migrations: &[Migration],
    version: usize,
) -> Result<()> {
    if version > migrations.len() {
        return Err(Error::InvalidInput(format!(
            "{}: no migration with version {} (only {} known)",
            database_name,
            version,
            migrations.len()
        )));
    }

    create_migrations_table(pool).await?;

    for migration in migrations[version..].iter().rev() {
        if !is_applied(pool, database_name, migration.name).await? {
            continue;
        }

        let mut tx = pool.begin().await?;

        for statement in migration.down {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        sqlx::query("DELETE FROM _migrations WHERE database_name = ? AND migration_name = ?")
            .bind(database_name)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!("{}: reverted migration {}", database_name, migration.name);
    }

    Ok(())
}
