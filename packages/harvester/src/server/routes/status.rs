use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::kernel::{RateLimitState, StatusCount};
use crate::server::app::AppState;
use crate::server::routes::ErrorResponse;

#[derive(Serialize)]
pub struct StatusResponse {
    /// Work-item counts per source and status.
    pub work_items: Vec<StatusCount>,
    /// Messages pending or in flight.
    pub queue_depth: i64,
    pub dead_letter_count: i64,
    pub scraped_records: i64,
    pub rate_limits: Vec<RateLimitState>,
}

/// Operational snapshot: per-source progress, queue depth, dead-letter
/// backlog, harvested-record count, and live rate-limit windows.
pub async fn status_handler(
    Extension(state): Extension<AppState>,
) -> Result<Json<StatusResponse>, (StatusCode, Json<ErrorResponse>)> {
    let snapshot = async {
        anyhow::Ok(StatusResponse {
            work_items: state.store.counts_by_status().await?,
            queue_depth: state.queue.depth().await?,
            dead_letter_count: state.queue.dead_letter_count().await?,
            scraped_records: state.store.scraped_record_count().await?,
            rate_limits: state.store.rate_limit_states().await?,
        })
    }
    .await
    .map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("status query failed: {e}"),
            }),
        )
    })?;

    Ok(Json(snapshot))
}
