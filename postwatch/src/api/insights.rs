//! Insight listing endpoint

use super::{interval_from_query, ApiError, AppState};
use crate::insights::{Category, FetchOptions, FetchedInsight, OrderBy};
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct FetchInsightsQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub order: Option<String>,
    pub filter: Option<String>,
    pub category: Option<String>,
    pub entries: Option<String>,
}

pub async fn fetch_insights(
    State(state): State<AppState>,
    Query(query): Query<FetchInsightsQuery>,
) -> Result<Json<Vec<FetchedInsight>>, ApiError> {
    let interval = interval_from_query(
        &super::IntervalQuery {
            from: query.from.clone(),
            to: query.to.clone(),
        },
        state.timezone,
    )?;

    let entries = match query.entries.as_deref() {
        None | Some("") => 0,
        Some(raw) => {
            let parsed: i64 = raw
                .parse()
                .map_err(|_| ApiError::BadRequest("Invalid entries query value".into()))?;

            if parsed < 0 {
                return Err(ApiError::BadRequest(
                    "Invalid entries query value: negative value".into(),
                ));
            }

            parsed as usize
        }
    };

    let category = match query.filter.as_deref() {
        Some("category") => query.category.as_deref().and_then(Category::from_name),
        _ => None,
    };

    let order = query
        .order
        .as_deref()
        .map(OrderBy::from_name)
        .unwrap_or_default();

    let insights = state
        .fetcher
        .fetch_insights(FetchOptions {
            interval,
            order,
            category,
            max_entries: entries,
        })
        .await?;

    Ok(Json(insights))
}
