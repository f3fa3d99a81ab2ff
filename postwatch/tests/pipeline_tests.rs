//! End-to-end pipeline tests: raw log lines through the transformer,
//! the tracker and the delivery writer, queried back via the dashboard.

use chrono::{TimeZone, Utc};
use postwatch::dashboard::Dashboard;
use postwatch::deliverydb::{self, DeliveryDb};
use postwatch::logsource::Transformer;
use postwatch::tracking::{self, Tracker};
use postwatch_common::db::{run_migrations, ConnPair};
use postwatch_common::time::TimeInterval;
use postwatch_parser::SmtpStatus;
use tokio::sync::{mpsc, watch};

struct Pipeline {
    tracker_db: ConnPair,
    logs_db: ConnPair,
}

async fn fresh_pipeline() -> Pipeline {
    let tracker_db = ConnPair::open_in_memory().await.unwrap();
    run_migrations(
        tracker_db.write(),
        tracking::migrations::DATABASE_NAME,
        tracking::migrations::MIGRATIONS,
    )
    .await
    .unwrap();

    let logs_db = ConnPair::open_in_memory().await.unwrap();
    run_migrations(
        logs_db.write(),
        deliverydb::migrations::DATABASE_NAME,
        deliverydb::migrations::MIGRATIONS,
    )
    .await
    .unwrap();

    Pipeline {
        tracker_db,
        logs_db,
    }
}

async fn ingest(pipeline: &Pipeline, lines: &[&str]) {
    let (records_tx, records_rx) = mpsc::channel(256);
    let (results_tx, results_rx) = mpsc::channel(256);
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let tracker = Tracker::new(pipeline.tracker_db.write().clone());
    let tracker_handle = tokio::spawn(tracker.run(records_rx, results_tx, cancel_rx.clone()));

    let delivery = DeliveryDb::new(pipeline.logs_db.write().clone());
    let delivery_handle = tokio::spawn(delivery.run(results_rx, cancel_rx));

    let mut transformer = Transformer::new(2020);
    for line in lines {
        let record = transformer
            .transform(line.as_bytes())
            .expect("test line must parse");
        records_tx.send(record).await.unwrap();
    }
    drop(records_tx);

    tracker_handle.await.unwrap().unwrap();
    delivery_handle.await.unwrap().unwrap();
}

fn june_2020() -> TimeInterval {
    TimeInterval {
        from: Utc.with_ymd_and_hms(2020, 6, 16, 0, 0, 0).unwrap(),
        to: Utc.with_ymd_and_hms(2020, 6, 17, 23, 59, 59).unwrap(),
    }
}

const DEFERRED_LINE: &str =
    "Jun 16 00:07:43 smtpnode07 postfix-10.20.30.40/smtp[3022]: 0C31D3D1E6: to=<r@aol.com>, \
     relay=mx.aol.com[11.22.33.44]:25, delay=18910, delays=18900/8.9/0.69/0.03, dsn=4.7.0, \
     status=deferred (host mx.aol.com[11.22.33.44] said: 421 try again later)";

const BOUNCED_LINE: &str =
    "Jun 16 00:07:44 smtpnode07 postfix-10.20.30.40/smtp[3022]: 0C31D3D1E6: to=<r@aol.com>, \
     relay=mx.aol.com[11.22.33.44]:25, delay=18911, delays=18900/8.9/0.69/0.04, dsn=5.7.0, \
     status=bounced (host mx.aol.com[11.22.33.44] said: 550 gone)";

#[tokio::test]
async fn deferred_alone_produces_no_deliveries() {
    let pipeline = fresh_pipeline().await;
    ingest(&pipeline, &[DEFERRED_LINE]).await;

    let dashboard = Dashboard::new(pipeline.logs_db.read().clone());
    assert_eq!(
        dashboard
            .count_by_status(SmtpStatus::Deferred, june_2020())
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn deferred_then_bounced_counts_one_bounce() {
    let pipeline = fresh_pipeline().await;
    ingest(&pipeline, &[DEFERRED_LINE, BOUNCED_LINE]).await;

    let dashboard = Dashboard::new(pipeline.logs_db.read().clone());
    assert_eq!(
        dashboard
            .count_by_status(SmtpStatus::Bounced, june_2020())
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        dashboard
            .count_by_status(SmtpStatus::Deferred, june_2020())
            .await
            .unwrap(),
        0
    );
}

async fn delivery_rows(pipeline: &Pipeline) -> Vec<(i64, i64, String)> {
    sqlx::query_as(
        r#"
        SELECT d.status, d.delivery_ts, rd.domain
        FROM deliveries d
        LEFT JOIN remote_domains rd ON d.recipient_domain_part_id = rd.id
        ORDER BY d.delivery_ts, d.status, rd.domain
        "#,
    )
    .fetch_all(pipeline.logs_db.read())
    .await
    .unwrap()
}

#[tokio::test]
async fn replaying_the_same_corpus_is_idempotent() {
    let corpus = [
        "Jun 16 00:07:41 mail postfix/smtpd[2000]: connect from client.example.com[203.0.113.10]",
        "Jun 16 00:07:43 mail postfix/smtpd[2000]: 0C31D3D1E6: client=client.example.com[203.0.113.10]",
        "Jun 16 00:07:44 mail postfix/cleanup[2010]: 0C31D3D1E6: message-id=<abc@client.example.com>",
        "Jun 16 00:07:45 mail postfix/qmgr[2020]: 0C31D3D1E6: from=<s@client.example.com>, size=1329, nrcpt=1 (queue active)",
        "Jun 16 00:07:50 mail postfix/smtp[3022]: 0C31D3D1E6: to=<r@aol.com>, relay=mx.aol.com[11.22.33.44]:25, \
         delay=1.2, delays=0.5/0.1/0.2/0.4, dsn=2.0.0, status=sent (250 ok)",
        "Jun 16 00:07:55 mail postfix/smtpd[2000]: disconnect from client.example.com[203.0.113.10]",
        DEFERRED_LINE,
        BOUNCED_LINE,
    ];

    let first = fresh_pipeline().await;
    ingest(&first, &corpus).await;

    let second = fresh_pipeline().await;
    ingest(&second, &corpus).await;

    let first_rows = delivery_rows(&first).await;
    let second_rows = delivery_rows(&second).await;

    assert_eq!(first_rows.len(), 2);
    assert_eq!(first_rows, second_rows);
}
