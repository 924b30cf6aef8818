//! Record handlers: lookup and status counts.

use super::StatsResponse;
use crate::api::AppState;
use crate::types::{AnalyzedContent, RecordId};
use crate::{Error, Result};
use axum::{
    Json,
    extract::{Path, State},
};

/// GET /records/:id - Get a record's lifecycle fields
#[utoipa::path(
    get,
    path = "/records/{id}",
    tag = "records",
    params(
        ("id" = i64, Path, description = "Record ID")
    ),
    responses(
        (status = 200, description = "Record found", body = AnalyzedContent),
        (status = 404, description = "Record not found", body = crate::error::ApiError),
        (status = 500, description = "Database unreachable", body = crate::error::ApiError)
    )
)]
pub async fn get_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<AnalyzedContent>> {
    let id = RecordId(id);
    state
        .db
        .get_record(id)
        .await?
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("record {}", id)))
}

/// GET /stats - Record counts per status
#[utoipa::path(
    get,
    path = "/stats",
    tag = "records",
    responses(
        (status = 200, description = "Counts per status", body = StatsResponse),
        (status = 500, description = "Database unreachable", body = crate::error::ApiError)
    )
)]
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let statuses = state.db.count_by_status().await?;
    let total = statuses.iter().map(|s| s.count).sum();
    Ok(Json(StatsResponse { total, statuses }))
}
