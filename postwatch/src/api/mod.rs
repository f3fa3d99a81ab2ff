//! HTTP JSON API
//!
//! Thin adapter over the dashboard and the insight fetcher, rooted at
//! `/api/v0`. All handlers are read-only and run against the read pools;
//! requests are bounded by a 30 second timeout.

pub mod dashboard;
pub mod insights;

use crate::dashboard::Dashboard;
use crate::insights::Fetcher;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use postwatch_common::time::TimeInterval;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub dashboard: Dashboard,
    pub fetcher: Arc<Fetcher>,
    pub timezone: chrono_tz::Tz,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v0/countByStatus", get(dashboard::count_by_status))
        .route("/api/v0/topBusiestDomains", get(dashboard::top_busiest_domains))
        .route("/api/v0/topBouncedDomains", get(dashboard::top_bounced_domains))
        .route("/api/v0/topDeferredDomains", get(dashboard::top_deferred_domains))
        .route("/api/v0/deliveryStatus", get(dashboard::delivery_status))
        .route("/api/v0/fetchInsights", get(insights::fetch_insights))
        .with_state(state)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CorsLayer::permissive())
}

/// API errors map straight onto status codes; bodies carry only the
/// leaf message, never the error chain
#[derive(Debug)]
pub enum ApiError {
    /// Missing, malformed or inverted dates
    UnprocessableDates(String),
    BadRequest(String),
    Internal(String),
}

impl From<postwatch_common::Error> for ApiError {
    fn from(e: postwatch_common::Error) -> ApiError {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::UnprocessableDates(m) => (StatusCode::UNPROCESSABLE_ENTITY, m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Date range accepted by every endpoint
#[derive(Debug, Deserialize)]
pub struct IntervalQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

pub fn interval_from_query(
    query: &IntervalQuery,
    timezone: chrono_tz::Tz,
) -> Result<TimeInterval, ApiError> {
    let from = query
        .from
        .as_deref()
        .ok_or_else(|| ApiError::UnprocessableDates("missing mandatory parameter 'from'".into()))?;
    let to = query
        .to
        .as_deref()
        .ok_or_else(|| ApiError::UnprocessableDates("missing mandatory parameter 'to'".into()))?;

    TimeInterval::parse(from, to, timezone)
        .map_err(|e| ApiError::UnprocessableDates(e.to_string()))
}
