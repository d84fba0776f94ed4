use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::covers;
use crate::db::models::{Archive, Chapter, Series};
use crate::db::queries::{archives, chapters, history, series};
use crate::error::AppError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct ItemDetails {
    #[serde(flatten)]
    pub archive: Archive,
    pub series: Option<Series>,
    pub chapters: Vec<Chapter>,
}

#[derive(Deserialize, Default)]
pub struct PageQuery {
    #[serde(default)]
    pub convert: bool,
}

#[derive(Deserialize)]
pub struct HistoryRequest {
    pub user_id: i64,
    pub current_page: i64,
}

/// Archive row that is still visible, looked up by archive or chapter id.
async fn visible_archive(state: &AppState, hash: &str) -> Result<Archive, AppError> {
    let archive = match archives::get_by_id(&state.db, hash).await? {
        Some(a) => Some(a),
        None => match chapters::get_by_id(&state.db, hash).await? {
            Some(c) => archives::get_by_id(&state.db, &c.archive_id).await?,
            None => None,
        },
    };
    archive
        .filter(|a| !a.deleted)
        .ok_or_else(|| AppError::NotFound(format!("item {hash}")))
}

/// GET /items/{hash}
pub async fn details(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<ItemDetails>, AppError> {
    let archive = archives::get_by_id(&state.db, &hash)
        .await?
        .filter(|a| !a.deleted)
        .ok_or_else(|| AppError::NotFound(format!("item {hash}")))?;
    let series = series::get_by_id(&state.db, &archive.series_id).await?;
    let chapters = chapters::list_by_archive(&state.db, &archive.content_id).await?;
    Ok(Json(ItemDetails {
        archive,
        series,
        chapters,
    }))
}

/// GET /items/{hash}/page/{n}
pub async fn page(
    State(state): State<AppState>,
    Path((hash, n)): Path<(String, i64)>,
    Query(query): Query<PageQuery>,
) -> Result<Response, AppError> {
    let page = state
        .pages
        .page(&state.db, &state.cache, &hash, n, query.convert)
        .await?;
    Ok(image_response(page.data, &page.mime))
}

/// GET /items/{hash}/cover
pub async fn cover(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, AppError> {
    let archive = visible_archive(&state, &hash).await?;
    let covers_dir = state.config.library.covers_path.clone();
    let cover = tokio::task::spawn_blocking(move || covers::load_or_extract(&covers_dir, &archive))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("cover of {hash}")))?;
    Ok(image_response(cover.data, &cover.mime))
}

/// DELETE /items/{hash}
pub async fn delete(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !archives::set_deleted(&state.db, &hash, true).await? {
        return Err(AppError::NotFound(format!("item {hash}")));
    }
    state.cache.evict(&hash);
    tracing::info!("Item {hash} marked as deleted");
    Ok(Json(serde_json::json!({ "success": true })))
}

/// POST /items/{hash}/history
pub async fn save_history(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Json(body): Json<HistoryRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let item = state
        .cache
        .resolve(&state.db, &hash)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("item {hash}")))?;
    if body.current_page < 0 || body.current_page > item.pages_count {
        return Err(AppError::BadRequest(format!(
            "current_page must be within 0..={}",
            item.pages_count
        )));
    }
    history::save(
        &state.db,
        body.user_id,
        &item.content_id,
        item.pages_count,
        body.current_page,
    )
    .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "pages_count": item.pages_count,
        "current_page": body.current_page,
    })))
}

fn image_response(data: Vec<u8>, mime: &str) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (header::CONTENT_LENGTH, data.len().to_string()),
            (header::CACHE_CONTROL, "private, max-age=86400".to_string()),
        ],
        data,
    )
        .into_response()
}
