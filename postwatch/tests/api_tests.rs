//! Integration tests for the HTTP JSON API
//!
//! Covers date validation, the insight listing contract and the
//! dashboard endpoints, against in-memory databases.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, TimeZone, Utc};
use postwatch::api::{build_router, AppState};
use postwatch::dashboard::Dashboard;
use postwatch::deliverydb;
use postwatch::insights::{
    self, mailinactivity, Category, Creator, Fetcher, InsightProperties, Rating,
};
use postwatch::notification::{Center, Notification, Notifier, Policies};
use postwatch_common::db::{run_migrations, ConnPair};
use postwatch_common::time::TimeInterval;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tower::util::ServiceExt; // for `oneshot`

struct RecordingNotifier {
    received: Mutex<Vec<i64>>,
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn notify(&self, n: &Notification, _language: &str) -> postwatch_common::Result<()> {
        self.received.lock().unwrap().push(n.id);
        Ok(())
    }
}

struct Fixture {
    app: axum::Router,
    master: ConnPair,
    logs: ConnPair,
    creator: Creator,
    notified: Arc<RecordingNotifier>,
}

async fn setup() -> Fixture {
    let master = ConnPair::open_in_memory().await.unwrap();
    run_migrations(master.write(), "master", insights::migrations::MIGRATIONS)
        .await
        .unwrap();

    let logs = ConnPair::open_in_memory().await.unwrap();
    run_migrations(
        logs.write(),
        deliverydb::migrations::DATABASE_NAME,
        deliverydb::migrations::MIGRATIONS,
    )
    .await
    .unwrap();

    let notified = Arc::new(RecordingNotifier {
        received: Mutex::new(Vec::new()),
    });
    let center = Arc::new(Center::with_fixed_language(
        "en",
        Policies::default(),
        vec![notified.clone()],
    ));

    let registry = insights::default_registry();
    let creator = Creator::new(registry.clone(), center);

    let state = AppState {
        dashboard: Dashboard::new(logs.read().clone()),
        fetcher: Arc::new(Fetcher::new(master.read().clone(), registry)),
        timezone: chrono_tz::UTC,
    };

    Fixture {
        app: build_router(state),
        master,
        logs,
        creator,
        notified,
    }
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    (status, body)
}

// ---------------------------------------------------------------
// date validation

#[tokio::test]
async fn missing_dates_are_unprocessable() {
    let fixture = setup().await;

    let (status, _) = get(&fixture.app, "/api/v0/countByStatus").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = get(&fixture.app, "/api/v0/countByStatus?from=2020-01-01").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = get(&fixture.app, "/api/v0/deliveryStatus?to=2020-01-01").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn inverted_and_malformed_dates_are_unprocessable() {
    let fixture = setup().await;

    let (status, _) = get(
        &fixture.app,
        "/api/v0/countByStatus?from=1999-12-31&to=1999-01-01",
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = get(
        &fixture.app,
        "/api/v0/topBusiestDomains?from=not-a-date&to=1999-01-01",
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn negative_entries_is_a_bad_request() {
    let fixture = setup().await;

    let (status, _) = get(
        &fixture.app,
        "/api/v0/fetchInsights?from=1999-01-01&to=1999-12-31&order=creationDesc&entries=-42",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(
        &fixture.app,
        "/api/v0/fetchInsights?from=1999-01-01&to=1999-12-31&order=creationDesc&entries=abc",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------
// insights listing

async fn seed_insight(fixture: &Fixture, time: chrono::DateTime<Utc>, rating: Rating) -> i64 {
    let mut tx = fixture.master.write().begin().await.unwrap();
    let id = fixture
        .creator
        .generate_insight(
            &mut tx,
            InsightProperties {
                time,
                category: Category::Local,
                rating,
                content_type: mailinactivity::CONTENT_TYPE,
                content: serde_json::to_value(mailinactivity::Content {
                    interval: TimeInterval {
                        from: time - Duration::hours(1),
                        to: time,
                    },
                })
                .unwrap(),
            },
        )
        .await
        .unwrap();
    tx.commit().await.unwrap();
    id
}

#[tokio::test]
async fn insights_are_listed_in_reverse_creation_order_and_bad_ones_notified() {
    let fixture = setup().await;
    let t = Utc.with_ymd_and_hms(2020, 6, 16, 12, 0, 0).unwrap();

    seed_insight(&fixture, t + Duration::seconds(2), Rating::Bad).await;
    seed_insight(&fixture, t + Duration::seconds(5), Rating::Ok).await;
    seed_insight(&fixture, t + Duration::seconds(7), Rating::Bad).await;

    let (status, body) = get(
        &fixture.app,
        "/api/v0/fetchInsights?from=2020-06-16&to=2020-06-17&order=creationDesc",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["id"], 3);
    assert_eq!(entries[1]["id"], 2);
    assert_eq!(entries[2]["id"], 1);

    assert_eq!(entries[0]["rating"], "bad");
    assert_eq!(entries[0]["category"], "local");
    assert_eq!(entries[0]["content_type"], "mail_inactivity");
    assert!(entries[0]["content"]["interval"]["from"].is_string());

    // exactly the two bad-rated insights were dispatched
    assert_eq!(*fixture.notified.received.lock().unwrap(), vec![1, 3]);
}

#[tokio::test]
async fn insights_listing_respects_order_category_and_entries() {
    let fixture = setup().await;
    let t = Utc.with_ymd_and_hms(2020, 6, 16, 12, 0, 0).unwrap();

    for i in 0..5 {
        seed_insight(&fixture, t + Duration::seconds(i), Rating::Unrated).await;
    }

    let (status, body) = get(
        &fixture.app,
        "/api/v0/fetchInsights?from=2020-06-16&to=2020-06-17&order=creationAsc&entries=2",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["id"], 1);

    // category filter: everything seeded is local
    let (_, body) = get(
        &fixture.app,
        "/api/v0/fetchInsights?from=2020-06-16&to=2020-06-17&order=creationAsc&filter=category&category=news",
    )
    .await;
    assert_eq!(body.as_array().unwrap().len(), 0);

    let (_, body) = get(
        &fixture.app,
        "/api/v0/fetchInsights?from=2020-06-16&to=2020-06-17&order=creationAsc&filter=category&category=local",
    )
    .await;
    assert_eq!(body.as_array().unwrap().len(), 5);
}

// ---------------------------------------------------------------
// dashboard endpoints

async fn seed_delivery(fixture: &Fixture, status: i64, ts: i64, domain: &str) {
    let domain_id: Option<i64> = sqlx::query_scalar("SELECT id FROM remote_domains WHERE domain = ?")
        .bind(domain)
        .fetch_optional(fixture.logs.write())
        .await
        .unwrap();

    let domain_id = match domain_id {
        Some(id) => id,
        None => sqlx::query("INSERT INTO remote_domains (domain) VALUES (?)")
            .bind(domain)
            .execute(fixture.logs.write())
            .await
            .unwrap()
            .last_insert_rowid(),
    };

    sqlx::query(
        "INSERT INTO deliveries (status, delivery_ts, direction, recipient_domain_part_id, delivery_server_id) \
         VALUES (?, ?, 0, ?, 1)",
    )
    .bind(status)
    .bind(ts)
    .bind(domain_id)
    .execute(fixture.logs.write())
    .await
    .unwrap();
}

#[tokio::test]
async fn count_by_status_reports_all_three_statuses() {
    let fixture = setup().await;
    let ts = Utc.with_ymd_and_hms(2020, 6, 16, 0, 7, 43).unwrap().timestamp();

    seed_delivery(&fixture, 0, ts, "example.com").await;
    seed_delivery(&fixture, 1, ts + 1, "example.com").await;
    seed_delivery(&fixture, 1, ts + 2, "other.org").await;

    let (status, body) = get(
        &fixture.app,
        "/api/v0/countByStatus?from=2020-06-16&to=2020-06-17",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sent"], 1);
    assert_eq!(body["bounced"], 2);
    assert_eq!(body["deferred"], 0);
}

#[tokio::test]
async fn top_domains_serialize_as_capitalized_pairs() {
    let fixture = setup().await;
    let ts = Utc.with_ymd_and_hms(2020, 6, 16, 0, 7, 43).unwrap().timestamp();

    seed_delivery(&fixture, 1, ts, "zed.example").await;
    seed_delivery(&fixture, 1, ts + 1, "abc.example").await;

    let (status, body) = get(
        &fixture.app,
        "/api/v0/topBouncedDomains?from=2020-06-16&to=2020-06-17",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        serde_json::json!([
            {"Key": "abc.example", "Value": 1},
            {"Key": "zed.example", "Value": 1},
        ])
    );
}

#[tokio::test]
async fn delivery_status_groups_by_status_name() {
    let fixture = setup().await;
    let ts = Utc.with_ymd_and_hms(2020, 6, 16, 0, 7, 43).unwrap().timestamp();

    seed_delivery(&fixture, 0, ts, "example.com").await;
    seed_delivery(&fixture, 2, ts + 1, "example.com").await;

    let (status, body) = get(
        &fixture.app,
        "/api/v0/deliveryStatus?from=2020-06-16&to=2020-06-17",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        serde_json::json!([
            {"Key": "sent", "Value": 1},
            {"Key": "deferred", "Value": 1},
        ])
    );
}
