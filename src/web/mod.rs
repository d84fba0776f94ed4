pub mod items;
pub mod library;
pub mod upload;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};

use crate::state::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    // Body limit for upload: configured max + 1 MB overhead for multipart framing
    let upload_body_limit =
        (state.config.upload.max_upload_size_mb as usize * 1024 * 1024) + 1_048_576;

    Router::new()
        .route("/items/{hash}", get(items::details).delete(items::delete))
        .route("/items/{hash}/page/{n}", get(items::page))
        .route("/items/{hash}/cover", get(items::cover))
        .route("/items/{hash}/history", post(items::save_history))
        .route("/library/rescan", post(library::rescan_all))
        .route("/library/folders/{id}/rescan", post(library::rescan_folder))
        .route("/library/items/{hash}/rescan", post(library::rescan_item))
        .route("/library/status", get(library::status))
        .route(
            "/uploader/upload",
            post(upload::upload).layer(DefaultBodyLimit::max(upload_body_limit)),
        )
}
