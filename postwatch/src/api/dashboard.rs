//! Dashboard endpoints

use super::{interval_from_query, ApiError, AppState, IntervalQuery};
use crate::dashboard::Pair;
use axum::extract::{Query, State};
use axum::Json;
use postwatch_common::time::TimeInterval;
use postwatch_parser::SmtpStatus;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct CountByStatusResult {
    pub sent: i64,
    pub deferred: i64,
    pub bounced: i64,
}

pub async fn count_by_status(
    State(state): State<AppState>,
    Query(query): Query<IntervalQuery>,
) -> Result<Json<CountByStatusResult>, ApiError> {
    let interval = interval_from_query(&query, state.timezone)?;

    let sent = state.dashboard.count_by_status(SmtpStatus::Sent, interval).await?;
    let deferred = state.dashboard.count_by_status(SmtpStatus::Deferred, interval).await?;
    let bounced = state.dashboard.count_by_status(SmtpStatus::Bounced, interval).await?;

    Ok(Json(CountByStatusResult {
        sent,
        deferred,
        bounced,
    }))
}

async fn serve_pairs<F, Fut>(
    state: &AppState,
    query: &IntervalQuery,
    f: F,
) -> Result<Json<Vec<Pair>>, ApiError>
where
    F: FnOnce(TimeInterval) -> Fut,
    Fut: std::future::Future<Output = postwatch_common::Result<Vec<Pair>>>,
{
    let interval = interval_from_query(query, state.timezone)?;
    Ok(Json(f(interval).await?))
}

pub async fn top_busiest_domains(
    State(state): State<AppState>,
    Query(query): Query<IntervalQuery>,
) -> Result<Json<Vec<Pair>>, ApiError> {
    serve_pairs(&state, &query, |i| state.dashboard.top_busiest_domains(i)).await
}

pub async fn top_bounced_domains(
    State(state): State<AppState>,
    Query(query): Query<IntervalQuery>,
) -> Result<Json<Vec<Pair>>, ApiError> {
    serve_pairs(&state, &query, |i| state.dashboard.top_bounced_domains(i)).await
}

pub async fn top_deferred_domains(
    State(state): State<AppState>,
    Query(query): Query<IntervalQuery>,
) -> Result<Json<Vec<Pair>>, ApiError> {
    serve_pairs(&state, &query, |i| state.dashboard.top_deferred_domains(i)).await
}

pub async fn delivery_status(
    State(state): State<AppState>,
    Query(query): Query<IntervalQuery>,
) -> Result<Json<Vec<Pair>>, ApiError> {
    serve_pairs(&state, &query, |i| state.dashboard.delivery_status(i)).await
}
