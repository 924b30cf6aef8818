//! Job trigger handlers: analysis runs and rescue scans.

use crate::api::AppState;
use crate::types::{RescueSummary, RunSummary};
use crate::Result;
use axum::{Json, extract::State};

/// POST /jobs/analyze - Run one analysis batch
///
/// Responds once the batch has been processed. Per-record failures are part
/// of the summary; only an unreachable database fails the request.
#[utoipa::path(
    post,
    path = "/jobs/analyze",
    tag = "jobs",
    responses(
        (status = 200, description = "Batch processed", body = RunSummary),
        (status = 401, description = "Missing or invalid API key", body = crate::error::ApiError),
        (status = 500, description = "Database unreachable", body = crate::error::ApiError)
    )
)]
pub async fn run_analysis(State(state): State<AppState>) -> Result<Json<RunSummary>> {
    let summary = state.analyzer.run_batch().await?;
    Ok(Json(summary))
}

/// POST /jobs/rescue - Run one stuck-lease rescue scan
#[utoipa::path(
    post,
    path = "/jobs/rescue",
    tag = "jobs",
    responses(
        (status = 200, description = "Scan finished", body = RescueSummary),
        (status = 401, description = "Missing or invalid API key", body = crate::error::ApiError),
        (status = 500, description = "Database unreachable", body = crate::error::ApiError)
    )
)]
pub async fn run_rescue(State(state): State<AppState>) -> Result<Json<RescueSummary>> {
    let summary = state.rescuer.rescue().await?;
    Ok(Json(summary))
}
