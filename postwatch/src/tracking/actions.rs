//! Per-record tracking actions
//!
//! Every parsed record maps to one action mutating the entity graph
//! inside the writer's open transaction. Correlation uses the
//! `(host, pid)` pair for connections and `(host, queue_text)` for
//! queues; when a record arrives before the row it refers to, a synthetic
//! row is created so out-of-order logs still stitch ("late bind").
//!
//! Reference counting is explicit: a pid is held by its connections, a
//! connection by being open plus by its queues, a queue by being live
//! plus by parenting links from child queues, a message-id by its queues.
//! A counter reaching zero deletes the row eagerly.

use super::result::{ResultData, ResultEntry, ResultKey};
use super::values::{bind_entry, column_entry};
use postwatch_common::Result;
use postwatch_parser::{
    CleanupMessageAccepted, Header, Payload, Pickup, QmgrMailQueued, QmgrReturnedToSender, Record,
    SmtpSentStatus, SmtpStatus, SmtpdConnect, SmtpdDisconnect, SmtpdMailAccepted,
};
use sqlx::{Sqlite, Transaction};
use tracing::{debug, warn};

type Tx<'c> = Transaction<'c, Sqlite>;

/// Keys of the `connection_data` table (durable integers)
#[derive(Debug, Clone, Copy)]
#[repr(i64)]
enum ConnectionDataKey {
    Begin = 0,
    End = 1,
    ClientHostname = 2,
    ClientIp = 3,
}

/// Keys of the `queue_data` table (durable integers)
#[derive(Debug, Clone, Copy)]
#[repr(i64)]
enum QueueDataKey {
    Begin = 0,
    SenderLocalPart = 1,
    SenderDomainPart = 2,
    MessageSize = 3,
    Nrcpt = 4,
    DeferredCount = 5,
    LastDeferredDsn = 6,
    PickupUid = 7,
}

/// Re-queueing link kinds recorded in `queue_parenting`
const PARENTING_FORWARDED: i64 = 1;

pub(crate) async fn apply_record(tx: &mut Tx<'_>, record: &Record) -> Result<()> {
    let h = &record.header;

    match &record.payload {
        Payload::SmtpdConnect(p) => on_connect(tx, h, p).await,
        Payload::SmtpdDisconnect(p) => on_disconnect(tx, h, p).await,
        Payload::SmtpdMailAccepted(p) => on_mail_accepted(tx, h, p).await,
        Payload::SmtpdReject(p) => {
            // rejected before a queue existed; nothing to correlate
            debug!(queue = %p.queue, "rejected connection attempt");
            Ok(())
        }
        Payload::Pickup(p) => on_pickup(tx, h, p).await,
        Payload::CleanupMessageAccepted(p) => on_cleanup(tx, h, p).await,
        Payload::QmgrMailQueued(p) => on_qmgr_queued(tx, h, p).await,
        Payload::QmgrReturnedToSender(p) => on_qmgr_expired(tx, h, p).await,
        Payload::SmtpSentStatus(p) => on_sent_status(tx, h, p).await,
    }
}

// ------------------------------------------------------------------
// pid / connection bookkeeping

async fn find_or_create_pid(tx: &mut Tx<'_>, host: &str, pid: i64) -> Result<i64> {
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM pids WHERE host = ? AND pid = ?")
        .bind(host)
        .bind(pid)
        .fetch_optional(&mut **tx)
        .await?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let id = sqlx::query("INSERT INTO pids (host, pid, usage_counter) VALUES (?, ?, 0)")
        .bind(host)
        .bind(pid)
        .execute(&mut **tx)
        .await?
        .last_insert_rowid();

    Ok(id)
}

async fn create_connection(tx: &mut Tx<'_>, pid_id: i64) -> Result<i64> {
    let id = sqlx::query("INSERT INTO connections (pid_id, usage_counter) VALUES (?, 1)")
        .bind(pid_id)
        .execute(&mut **tx)
        .await?
        .last_insert_rowid();

    sqlx::query("UPDATE pids SET usage_counter = usage_counter + 1 WHERE id = ?")
        .bind(pid_id)
        .execute(&mut **tx)
        .await?;

    Ok(id)
}

async fn find_connection(tx: &mut Tx<'_>, host: &str, pid: i64) -> Result<Option<i64>> {
    let id: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT c.id FROM connections c
        JOIN pids p ON c.pid_id = p.id
        WHERE p.host = ? AND p.pid = ?
        ORDER BY c.id DESC LIMIT 1
        "#,
    )
    .bind(host)
    .bind(pid)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(id)
}

async fn find_or_create_connection(tx: &mut Tx<'_>, host: &str, pid: i64) -> Result<i64> {
    if let Some(id) = find_connection(tx, host, pid).await? {
        return Ok(id);
    }

    // the connect line was not seen (rotation, startup); bind late
    let pid_id = find_or_create_pid(tx, host, pid).await?;
    create_connection(tx, pid_id).await
}

async fn set_connection_data(
    tx: &mut Tx<'_>,
    connection_id: i64,
    key: ConnectionDataKey,
    value: ResultEntry,
) -> Result<()> {
    let q = sqlx::query("INSERT INTO connection_data (connection_id, key, value) VALUES (?, ?, ?)")
        .bind(connection_id)
        .bind(key as i64);
    bind_entry(q, &value).execute(&mut **tx).await?;
    Ok(())
}

async fn release_connection_ref(tx: &mut Tx<'_>, connection_id: i64) -> Result<()> {
    let (pid_id, counter): (i64, i64) = sqlx::query_as(
        "UPDATE connections SET usage_counter = usage_counter - 1 WHERE id = ? RETURNING pid_id, usage_counter",
    )
    .bind(connection_id)
    .fetch_one(&mut **tx)
    .await?;

    if counter < 0 {
        panic!("connection {} usage counter underflow", connection_id);
    }

    if counter > 0 {
        return Ok(());
    }

    sqlx::query("DELETE FROM connection_data WHERE connection_id = ?")
        .bind(connection_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM connections WHERE id = ?")
        .bind(connection_id)
        .execute(&mut **tx)
        .await?;

    release_pid_ref(tx, pid_id).await
}

async fn release_pid_ref(tx: &mut Tx<'_>, pid_id: i64) -> Result<()> {
    let counter: i64 = sqlx::query_scalar(
        "UPDATE pids SET usage_counter = usage_counter - 1 WHERE id = ? RETURNING usage_counter",
    )
    .bind(pid_id)
    .fetch_one(&mut **tx)
    .await?;

    if counter < 0 {
        panic!("pid {} usage counter underflow", pid_id);
    }

    if counter == 0 {
        sqlx::query("DELETE FROM pids WHERE id = ?")
            .bind(pid_id)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

// ------------------------------------------------------------------
// queue bookkeeping

async fn create_queue(
    tx: &mut Tx<'_>,
    connection_id: Option<i64>,
    queue_text: &str,
) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO queues (connection_id, messageid_id, queue, usage_counter) VALUES (?, NULL, ?, 1)",
    )
    .bind(connection_id)
    .bind(queue_text)
    .execute(&mut **tx)
    .await?
    .last_insert_rowid();

    if let Some(connection_id) = connection_id {
        sqlx::query("UPDATE connections SET usage_counter = usage_counter + 1 WHERE id = ?")
            .bind(connection_id)
            .execute(&mut **tx)
            .await?;
    }

    Ok(id)
}

/// Most recent unprocessed queue with this text on this host. Synthetic
/// queues (no connection) cannot be host-checked and match any host.
async fn find_queue(tx: &mut Tx<'_>, host: &str, queue_text: &str) -> Result<Option<i64>> {
    let id: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT q.id FROM queues q
        LEFT JOIN connections c ON q.connection_id = c.id
        LEFT JOIN pids p ON c.pid_id = p.id
        WHERE q.queue = ?
          AND (q.connection_id IS NULL OR p.host = ?)
          AND NOT EXISTS (SELECT 1 FROM processed_queues pq WHERE pq.queue_id = q.id)
        ORDER BY q.id DESC LIMIT 1
        "#,
    )
    .bind(queue_text)
    .bind(host)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(id)
}

async fn find_or_create_queue(tx: &mut Tx<'_>, host: &str, queue_text: &str) -> Result<i64> {
    if let Some(id) = find_queue(tx, host, queue_text).await? {
        return Ok(id);
    }

    create_queue(tx, None, queue_text).await
}

async fn set_queue_data(
    tx: &mut Tx<'_>,
    queue_id: i64,
    key: QueueDataKey,
    value: ResultEntry,
) -> Result<()> {
    let q = sqlx::query("INSERT INTO queue_data (queue_id, key, value) VALUES (?, ?, ?)")
        .bind(queue_id)
        .bind(key as i64);
    bind_entry(q, &value).execute(&mut **tx).await?;
    Ok(())
}

async fn queue_data_entry(tx: &mut Tx<'_>, queue_id: i64, key: QueueDataKey) -> Result<ResultEntry> {
    let row = sqlx::query(
        "SELECT value FROM queue_data WHERE queue_id = ? AND key = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(queue_id)
    .bind(key as i64)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(|r| column_entry(&r, 0)).unwrap_or(ResultEntry::None))
}

pub(crate) async fn release_queue_ref(tx: &mut Tx<'_>, queue_id: i64) -> Result<()> {
    let (connection_id, messageid_id, counter): (Option<i64>, Option<i64>, i64) = sqlx::query_as(
        r#"
        UPDATE queues SET usage_counter = usage_counter - 1 WHERE id = ?
        RETURNING connection_id, messageid_id, usage_counter
        "#,
    )
    .bind(queue_id)
    .fetch_one(&mut **tx)
    .await?;

    if counter < 0 {
        panic!("queue {} usage counter underflow", queue_id);
    }

    if counter > 0 {
        return Ok(());
    }

    sqlx::query("DELETE FROM queue_data WHERE queue_id = ?")
        .bind(queue_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM processed_queues WHERE queue_id = ?")
        .bind(queue_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM queues WHERE id = ?")
        .bind(queue_id)
        .execute(&mut **tx)
        .await?;

    if let Some(messageid_id) = messageid_id {
        release_messageid_ref(tx, messageid_id).await?;
    }

    if let Some(connection_id) = connection_id {
        release_connection_ref(tx, connection_id).await?;
    }

    Ok(())
}

async fn release_messageid_ref(tx: &mut Tx<'_>, messageid_id: i64) -> Result<()> {
    let counter: i64 = sqlx::query_scalar(
        "UPDATE messageids SET usage_counter = usage_counter - 1 WHERE id = ? RETURNING usage_counter",
    )
    .bind(messageid_id)
    .fetch_one(&mut **tx)
    .await?;

    if counter < 0 {
        panic!("messageid {} usage counter underflow", messageid_id);
    }

    if counter == 0 {
        sqlx::query("DELETE FROM messageids WHERE id = ?")
            .bind(messageid_id)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

// ------------------------------------------------------------------
// record handlers

async fn on_connect(tx: &mut Tx<'_>, h: &Header, p: &SmtpdConnect) -> Result<()> {
    let pid_id = find_or_create_pid(tx, &h.host, h.pid).await?;
    let conn = create_connection(tx, pid_id).await?;

    set_connection_data(tx, conn, ConnectionDataKey::Begin, ResultEntry::Int(h.time.timestamp())).await?;
    set_connection_data(tx, conn, ConnectionDataKey::ClientHostname, ResultEntry::Text(p.host.clone())).await?;

    if let Some(ip) = p.ip {
        set_connection_data(tx, conn, ConnectionDataKey::ClientIp, ResultEntry::Text(ip.to_string())).await?;
    }

    Ok(())
}

async fn on_disconnect(tx: &mut Tx<'_>, h: &Header, _p: &SmtpdDisconnect) -> Result<()> {
    let Some(conn) = find_connection(tx, &h.host, h.pid).await? else {
        // connect line never seen; nothing to close
        debug!(host = %h.host, pid = h.pid, "disconnect without a tracked connection");
        return Ok(());
    };

    set_connection_data(tx, conn, ConnectionDataKey::End, ResultEntry::Int(h.time.timestamp())).await?;
    release_connection_ref(tx, conn).await
}

async fn on_mail_accepted(tx: &mut Tx<'_>, h: &Header, p: &SmtpdMailAccepted) -> Result<()> {
    let conn = find_or_create_connection(tx, &h.host, h.pid).await?;
    let queue = create_queue(tx, Some(conn), &p.queue).await?;

    set_queue_data(tx, queue, QueueDataKey::Begin, ResultEntry::Int(h.time.timestamp())).await
}

async fn on_pickup(tx: &mut Tx<'_>, h: &Header, p: &Pickup) -> Result<()> {
    let queue = create_queue(tx, None, &p.queue).await?;

    set_queue_data(tx, queue, QueueDataKey::Begin, ResultEntry::Int(h.time.timestamp())).await?;
    set_queue_data(tx, queue, QueueDataKey::PickupUid, ResultEntry::Int(p.uid as i64)).await?;

    let (local, domain) = match p.sender.split_once('@') {
        Some((l, d)) => (l, d),
        None => (p.sender.as_str(), ""),
    };
    set_queue_data(tx, queue, QueueDataKey::SenderLocalPart, ResultEntry::Text(local.to_owned())).await?;
    set_queue_data(tx, queue, QueueDataKey::SenderDomainPart, ResultEntry::Text(domain.to_owned())).await?;

    Ok(())
}

async fn on_cleanup(tx: &mut Tx<'_>, h: &Header, p: &CleanupMessageAccepted) -> Result<()> {
    let queue = find_or_create_queue(tx, &h.host, &p.queue).await?;

    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM messageids WHERE value = ? LIMIT 1")
        .bind(&p.message_id)
        .fetch_optional(&mut **tx)
        .await?;

    let messageid_id = match existing {
        Some(id) => {
            sqlx::query("UPDATE messageids SET usage_counter = usage_counter + 1 WHERE id = ?")
                .bind(id)
                .execute(&mut **tx)
                .await?;
            id
        }
        None => {
            sqlx::query("INSERT INTO messageids (value, usage_counter) VALUES (?, 1)")
                .bind(&p.message_id)
                .execute(&mut **tx)
                .await?
                .last_insert_rowid()
        }
    };

    sqlx::query("UPDATE queues SET messageid_id = ? WHERE id = ?")
        .bind(messageid_id)
        .bind(queue)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

async fn on_qmgr_queued(tx: &mut Tx<'_>, h: &Header, p: &QmgrMailQueued) -> Result<()> {
    let queue = find_or_create_queue(tx, &h.host, &p.queue).await?;

    set_queue_data(tx, queue, QueueDataKey::SenderLocalPart, ResultEntry::Text(p.sender.local.clone())).await?;
    set_queue_data(tx, queue, QueueDataKey::SenderDomainPart, ResultEntry::Text(p.sender.domain.clone())).await?;
    set_queue_data(tx, queue, QueueDataKey::MessageSize, ResultEntry::Int(p.size as i64)).await?;
    set_queue_data(tx, queue, QueueDataKey::Nrcpt, ResultEntry::Int(p.nrcpt as i64)).await?;

    Ok(())
}

async fn on_qmgr_expired(tx: &mut Tx<'_>, h: &Header, p: &QmgrReturnedToSender) -> Result<()> {
    let queue = find_or_create_queue(tx, &h.host, &p.queue).await?;

    if queue_data_entry(tx, queue, QueueDataKey::SenderLocalPart).await?.is_none() {
        set_queue_data(tx, queue, QueueDataKey::SenderLocalPart, ResultEntry::Text(p.sender.local.clone())).await?;
        set_queue_data(tx, queue, QueueDataKey::SenderDomainPart, ResultEntry::Text(p.sender.domain.clone())).await?;
    }

    finalize_queue(tx, queue, SmtpStatus::Expired, h, None).await
}

async fn on_sent_status(tx: &mut Tx<'_>, h: &Header, p: &SmtpSentStatus) -> Result<()> {
    let queue = find_or_create_queue(tx, &h.host, &p.queue).await?;

    match p.status {
        SmtpStatus::Deferred => {
            let count = queue_data_entry(tx, queue, QueueDataKey::DeferredCount)
                .await?
                .opt_int()
                .unwrap_or(0);
            set_queue_data(tx, queue, QueueDataKey::DeferredCount, ResultEntry::Int(count + 1)).await?;
            set_queue_data(tx, queue, QueueDataKey::LastDeferredDsn, ResultEntry::Text(p.dsn.clone())).await?;
            Ok(())
        }
        SmtpStatus::Sent | SmtpStatus::Bounced => {
            // a hand-off to another local instance spawns a child queue
            // inheriting the envelope
            if let Some(extra) = &p.extra_payload {
                clone_queue_for_forward(tx, queue, &extra.queue).await?;
            }

            finalize_queue(tx, queue, p.status, h, Some(p)).await
        }
        SmtpStatus::Expired => unreachable!("the parser never produces an expired status"),
    }
}

async fn clone_queue_for_forward(tx: &mut Tx<'_>, orig_queue: i64, new_queue_text: &str) -> Result<()> {
    // the receiving instance may run on any host, so the lookup is by
    // queue text alone
    let existing: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT q.id FROM queues q
        WHERE q.queue = ? AND q.id != ?
          AND NOT EXISTS (SELECT 1 FROM processed_queues pq WHERE pq.queue_id = q.id)
        ORDER BY q.id DESC LIMIT 1
        "#,
    )
    .bind(new_queue_text)
    .bind(orig_queue)
    .fetch_optional(&mut **tx)
    .await?;

    let child = match existing {
        Some(id) => id,
        None => create_queue(tx, None, new_queue_text).await?,
    };

    sqlx::query(
        "INSERT INTO queue_parenting (orig_queue_id, new_queue_id, parenting_type) VALUES (?, ?, ?)",
    )
    .bind(orig_queue)
    .bind(child)
    .bind(PARENTING_FORWARDED)
    .execute(&mut **tx)
    .await?;

    // the child holds its parent alive until the child itself finalizes
    sqlx::query("UPDATE queues SET usage_counter = usage_counter + 1 WHERE id = ?")
        .bind(orig_queue)
        .execute(&mut **tx)
        .await?;

    // transfer the envelope attributes the child will need at finalization
    for key in [
        QueueDataKey::SenderLocalPart,
        QueueDataKey::SenderDomainPart,
        QueueDataKey::MessageSize,
        QueueDataKey::Nrcpt,
        QueueDataKey::Begin,
    ] {
        let value = queue_data_entry(tx, orig_queue, key).await?;
        if !value.is_none() {
            set_queue_data(tx, child, key, value).await?;
        }
    }

    Ok(())
}

// ------------------------------------------------------------------
// finalization

async fn finalize_queue(
    tx: &mut Tx<'_>,
    queue_id: i64,
    status: SmtpStatus,
    h: &Header,
    payload: Option<&SmtpSentStatus>,
) -> Result<()> {
    let already_processed: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM processed_queues WHERE queue_id = ?)")
            .bind(queue_id)
            .fetch_one(&mut **tx)
            .await?;

    if already_processed {
        warn!(queue_id, "queue finalized twice; keeping the first result");
        return Ok(());
    }

    let data = build_result(tx, queue_id, status, h, payload).await?;

    let result_id = sqlx::query("INSERT INTO results (queue_id) VALUES (?)")
        .bind(queue_id)
        .execute(&mut **tx)
        .await?
        .last_insert_rowid();

    for (key, entry) in data.iter_set() {
        let q = sqlx::query("INSERT INTO result_data (result_id, key, value) VALUES (?, ?, ?)")
            .bind(result_id)
            .bind(key as i64);
        bind_entry(q, entry).execute(&mut **tx).await?;
    }

    sqlx::query("INSERT INTO notification_queues (result_id, line, filename) VALUES (?, 0, NULL)")
        .bind(result_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query("INSERT INTO processed_queues (queue_id) VALUES (?)")
        .bind(queue_id)
        .execute(&mut **tx)
        .await?;

    // this queue no longer parents anything: drop links where it is the
    // child and release its parents
    let parents: Vec<i64> =
        sqlx::query_scalar("SELECT orig_queue_id FROM queue_parenting WHERE new_queue_id = ?")
            .bind(queue_id)
            .fetch_all(&mut **tx)
            .await?;

    sqlx::query("DELETE FROM queue_parenting WHERE new_queue_id = ?")
        .bind(queue_id)
        .execute(&mut **tx)
        .await?;

    for parent in parents {
        release_queue_ref(tx, parent).await?;
    }

    Ok(())
}

async fn build_result(
    tx: &mut Tx<'_>,
    queue_id: i64,
    status: SmtpStatus,
    h: &Header,
    payload: Option<&SmtpSentStatus>,
) -> Result<ResultData> {
    let mut data = ResultData::default();

    data.set_int(ResultKey::Status, status.as_i64());
    data.set_int(ResultKey::DeliveryTime, h.time.timestamp());
    data.set_text(ResultKey::DeliveryServer, h.host.clone());

    // local deliveries come through lmtp; everything else relayed out
    let direction = match h.daemon.as_deref() {
        Some("lmtp") => 1,
        _ => 0,
    };
    data.set_int(ResultKey::Direction, direction);

    let (queue_text, messageid_id): (String, Option<i64>) =
        sqlx::query_as("SELECT queue, messageid_id FROM queues WHERE id = ?")
            .bind(queue_id)
            .fetch_one(&mut **tx)
            .await?;
    data.set_text(ResultKey::QueueText, queue_text);

    if let Some(messageid_id) = messageid_id {
        let value: String = sqlx::query_scalar("SELECT value FROM messageids WHERE id = ?")
            .bind(messageid_id)
            .fetch_one(&mut **tx)
            .await?;
        data.set_text(ResultKey::MessageId, value);
    }

    for (qkey, rkey) in [
        (QueueDataKey::Begin, ResultKey::QueueBegin),
        (QueueDataKey::SenderLocalPart, ResultKey::SenderLocalPart),
        (QueueDataKey::SenderDomainPart, ResultKey::SenderDomainPart),
        (QueueDataKey::MessageSize, ResultKey::MessageSize),
        (QueueDataKey::Nrcpt, ResultKey::Nrcpt),
    ] {
        let value = queue_data_entry(tx, queue_id, qkey).await?;
        if !value.is_none() {
            data.set(rkey, value);
        }
    }

    let connection_id: Option<i64> =
        sqlx::query_scalar("SELECT connection_id FROM queues WHERE id = ?")
            .bind(queue_id)
            .fetch_one(&mut **tx)
            .await?;

    if let Some(connection_id) = connection_id {
        for (ckey, rkey) in [
            (ConnectionDataKey::Begin, ResultKey::ConnectionBegin),
            (ConnectionDataKey::End, ResultKey::ConnectionEnd),
            (ConnectionDataKey::ClientHostname, ResultKey::ClientHostname),
            (ConnectionDataKey::ClientIp, ResultKey::ClientIp),
        ] {
            let row = sqlx::query(
                "SELECT value FROM connection_data WHERE connection_id = ? AND key = ? ORDER BY id DESC LIMIT 1",
            )
            .bind(connection_id)
            .bind(ckey as i64)
            .fetch_optional(&mut **tx)
            .await?;

            if let Some(row) = row {
                let value = column_entry(&row, 0);
                if !value.is_none() {
                    data.set(rkey, value);
                }
            }
        }
    }

    if let Some(p) = payload {
        data.set_text(ResultKey::RecipientLocalPart, p.recipient.local.clone());
        data.set_text(ResultKey::RecipientDomainPart, p.recipient.domain.clone());

        if let Some(orig) = &p.orig_recipient {
            data.set_text(ResultKey::OrigRecipientLocalPart, orig.local.clone());
            data.set_text(ResultKey::OrigRecipientDomainPart, orig.domain.clone());
        }

        if let Some(relay) = &p.relay {
            data.set_text(ResultKey::RelayName, relay.name.clone());
            if let Some(ip) = relay.ip {
                data.set_text(ResultKey::RelayIp, ip.to_string());
            }
            if let Some(port) = relay.port {
                data.set_int(ResultKey::RelayPort, port as i64);
            }
            if let Some(path) = &relay.path {
                data.set_text(ResultKey::RelayPath, path.clone());
            }
        }

        data.set_float(ResultKey::Delay, p.delay);
        data.set_float(ResultKey::DelaySmtpd, p.delays.smtpd as f64);
        data.set_float(ResultKey::DelayCleanup, p.delays.cleanup as f64);
        data.set_float(ResultKey::DelayQmgr, p.delays.qmgr as f64);
        data.set_float(ResultKey::DelaySmtp, p.delays.smtp as f64);
        data.set_text(ResultKey::Dsn, p.dsn.clone());
    }

    Ok(data)
}
