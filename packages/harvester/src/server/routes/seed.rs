use axum::{extract::Extension, http::StatusCode, Json};
use registry_extraction::supported_source_types;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::kernel::{SeedMode, SeedSummary};
use crate::server::app::AppState;
use crate::server::routes::ErrorResponse;

#[derive(Deserialize)]
pub struct SeedRequest {
    pub mode: SeedMode,
    /// Defaults to every supported source type.
    #[serde(default)]
    pub sources: Option<Vec<String>>,
}

#[derive(Serialize)]
pub struct SeedResponse {
    pub summary: SeedSummary,
}

/// Manually trigger a seed pass.
///
/// `{"mode": "test"}` seeds the fixed smoke-run locality set;
/// `{"mode": "full"}` seeds the configured production set. Repeating a
/// request is safe: already-queued identities are skipped.
pub async fn seed_handler(
    Extension(state): Extension<AppState>,
    Json(request): Json<SeedRequest>,
) -> Result<Json<SeedResponse>, (StatusCode, Json<ErrorResponse>)> {
    let sources: Vec<String> = match request.sources {
        Some(sources) => {
            for source in &sources {
                if !supported_source_types().contains(&source.as_str()) {
                    return Err((
                        StatusCode::BAD_REQUEST,
                        Json(ErrorResponse {
                            error: format!("unknown source type: {source}"),
                        }),
                    ));
                }
            }
            sources
        }
        None => supported_source_types()
            .iter()
            .map(|s| s.to_string())
            .collect(),
    };

    info!(mode = ?request.mode, sources = ?sources, "seed requested");

    let summary = state.seeder.seed(request.mode, &sources).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("seed failed: {e}"),
            }),
        )
    })?;

    Ok(Json(SeedResponse { summary }))
}
