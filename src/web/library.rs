use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::db::queries::counters;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Deserialize, Default)]
pub struct RescanQuery {
    #[serde(default)]
    pub reimport: bool,
    #[serde(default)]
    pub refresh_covers: bool,
}

fn accepted(queued: usize) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "success": true, "queued": queued })),
    )
}

/// POST /library/rescan
pub async fn rescan_all(
    State(state): State<AppState>,
    Query(query): Query<RescanQuery>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let queued = state
        .scheduler
        .rescan_all(query.reimport, query.refresh_covers)
        .await?;
    Ok(accepted(queued))
}

/// POST /library/folders/{id}/rescan
pub async fn rescan_folder(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<RescanQuery>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let queued = state
        .scheduler
        .rescan_folder(id, query.reimport, query.refresh_covers)
        .await?;
    Ok(accepted(queued))
}

/// POST /library/items/{hash}/rescan
pub async fn rescan_item(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let queued = state.scheduler.rescan_item(&hash).await?;
    Ok(accepted(queued))
}

/// GET /library/status
pub async fn status(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let counters: BTreeMap<String, i64> = counters::get_all(&state.db)
        .await?
        .into_iter()
        .map(|c| (c.name, c.value))
        .collect();
    Ok(Json(serde_json::json!({
        "scheduler": state.scheduler.status(),
        "counters": counters,
    })))
}
