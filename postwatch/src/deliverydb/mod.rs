//! Delivery database
//!
//! Append-only, denormalized storage of finalized tracking results.
//! Dimension values (message ids, remote domains, relays, delivery
//! servers) are interned into integer-keyed side tables; the referential
//! layer is enforced here, not by the storage engine.

pub mod migrations;

use crate::tracking::{ResultKey, TrackedResult};
use postwatch_common::Result;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

pub struct DeliveryDb {
    pool: SqlitePool,
}

impl DeliveryDb {
    /// `pool` must be the exclusive read-write handle of the delivery
    /// database
    pub fn new(pool: SqlitePool) -> DeliveryDb {
        DeliveryDb { pool }
    }

    /// Writer loop: appends every received result until the channel
    /// closes or cancellation is signalled
    pub async fn run(
        self,
        mut results: mpsc::Receiver<TrackedResult>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                maybe_result = results.recv() => match maybe_result {
                    Some(result) => self.store(&result).await?,
                    None => {
                        info!("result stream ended; delivery writer done");
                        return Ok(());
                    }
                },
                _ = cancel.changed() => {
                    // drain whatever is already buffered before stopping
                    while let Ok(result) = results.try_recv() {
                        self.store(&result).await?;
                    }
                    info!("delivery writer cancelled");
                    return Ok(());
                }
            }
        }
    }

    pub async fn store(&self, result: &TrackedResult) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_delivery(&mut tx, result).await?;
        tx.commit().await?;

        debug!(result_id = result.result_id, "stored delivery");
        Ok(())
    }

    /// Timestamp of the most recent stored delivery, if any. Used at
    /// startup to decide whether historical logs still need importing.
    pub async fn most_recent_delivery_time(&self) -> Result<Option<i64>> {
        let ts: Option<i64> = sqlx::query_scalar("SELECT MAX(delivery_ts) FROM deliveries")
            .fetch_one(&self.pool)
            .await?;
        Ok(ts)
    }
}

async fn insert_delivery(tx: &mut Transaction<'_, Sqlite>, result: &TrackedResult) -> Result<()> {
    let data = &result.data;

    let sender_domain_id = match data.get(ResultKey::SenderDomainPart).opt_text() {
        Some(domain) => Some(intern(tx, "remote_domains", "domain", domain).await?),
        None => None,
    };
    let recipient_domain_id = match data.get(ResultKey::RecipientDomainPart).opt_text() {
        Some(domain) => Some(intern(tx, "remote_domains", "domain", domain).await?),
        None => None,
    };
    let orig_recipient_domain_id = match data.get(ResultKey::OrigRecipientDomainPart).opt_text() {
        Some(domain) => Some(intern(tx, "remote_domains", "domain", domain).await?),
        None => None,
    };
    let message_id = match data.get(ResultKey::MessageId).opt_text() {
        Some(value) => Some(intern(tx, "messageids", "value", value).await?),
        None => None,
    };

    let delivery_server_id = intern(
        tx,
        "delivery_server",
        "hostname",
        data.get(ResultKey::DeliveryServer).text(),
    )
    .await?;

    let next_relay_id = match data.get(ResultKey::RelayName).opt_text() {
        Some(name) => Some(intern_relay(tx, name, data).await?),
        None => None,
    };

    sqlx::query(
        r#"
        INSERT INTO deliveries (
            status, delivery_ts, direction,
            sender_domain_part_id, recipient_domain_part_id, orig_recipient_domain_part_id,
            message_id, conn_ts_begin, queue_ts_begin,
            orig_msg_size, nrcpt, delivery_server_id,
            delay, delay_smtpd, delay_cleanup, delay_qmgr, delay_smtp,
            next_relay_id,
            sender_local_part, recipient_local_part, orig_recipient_local_part,
            client_hostname, client_ip, dsn
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(data.get(ResultKey::Status).int())
    .bind(data.get(ResultKey::DeliveryTime).int())
    .bind(data.get(ResultKey::Direction).int())
    .bind(sender_domain_id)
    .bind(recipient_domain_id)
    .bind(orig_recipient_domain_id)
    .bind(message_id)
    .bind(data.get(ResultKey::ConnectionBegin).opt_int())
    .bind(data.get(ResultKey::QueueBegin).opt_int())
    .bind(data.get(ResultKey::MessageSize).opt_int())
    .bind(data.get(ResultKey::Nrcpt).opt_int())
    .bind(delivery_server_id)
    .bind(opt_float(data, ResultKey::Delay))
    .bind(opt_float(data, ResultKey::DelaySmtpd))
    .bind(opt_float(data, ResultKey::DelayCleanup))
    .bind(opt_float(data, ResultKey::DelayQmgr))
    .bind(opt_float(data, ResultKey::DelaySmtp))
    .bind(next_relay_id)
    .bind(data.get(ResultKey::SenderLocalPart).opt_text())
    .bind(data.get(ResultKey::RecipientLocalPart).opt_text())
    .bind(data.get(ResultKey::OrigRecipientLocalPart).opt_text())
    .bind(data.get(ResultKey::ClientHostname).opt_text())
    .bind(data.get(ResultKey::ClientIp).opt_text())
    .bind(data.get(ResultKey::Dsn).opt_text())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn opt_float(data: &crate::tracking::ResultData, key: ResultKey) -> Option<f64> {
    match data.get(key) {
        crate::tracking::ResultEntry::Float(v) => Some(*v),
        _ => None,
    }
}

// select-or-insert on a single-column dimension table; table and column
// names are compile-time constants
async fn intern(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    column: &str,
    value: &str,
) -> Result<i64> {
    let existing: Option<i64> =
        sqlx::query_scalar(&format!("SELECT id FROM {} WHERE {} = ?", table, column))
            .bind(value)
            .fetch_optional(&mut **tx)
            .await?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let id = sqlx::query(&format!("INSERT INTO {} ({}) VALUES (?)", table, column))
        .bind(value)
        .execute(&mut **tx)
        .await?
        .last_insert_rowid();

    Ok(id)
}

async fn intern_relay(
    tx: &mut Transaction<'_, Sqlite>,
    name: &str,
    data: &crate::tracking::ResultData,
) -> Result<i64> {
    let ip = data.get(ResultKey::RelayIp).opt_text();
    let port = data.get(ResultKey::RelayPort).opt_int();

    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM next_relays WHERE hostname = ? AND ip IS ? AND port IS ?",
    )
    .bind(name)
    .bind(ip)
    .bind(port)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let id = sqlx::query("INSERT INTO next_relays (hostname, ip, port) VALUES (?, ?, ?)")
        .bind(name)
        .bind(ip)
        .bind(port)
        .execute(&mut **tx)
        .await?
        .last_insert_rowid();

    Ok(id)
}
