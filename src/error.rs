use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::pages::PageError;
use crate::scheduler::SchedulerError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("forbidden")]
    Forbidden,

    #[error("{0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl From<SchedulerError> for AppError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::AlreadyRunning => AppError::Conflict(e.to_string()),
            SchedulerError::NotFound(what) => AppError::NotFound(what),
            SchedulerError::OutsideLibrary(_) => AppError::BadRequest(e.to_string()),
            SchedulerError::QueueClosed => AppError::Internal(e.to_string()),
            SchedulerError::Db(e) => AppError::Db(e),
        }
    }
}

impl From<PageError> for AppError {
    fn from(e: PageError) -> Self {
        match e {
            PageError::NotFound(id) => AppError::NotFound(id),
            PageError::OutOfRange { .. } => AppError::NotFound(e.to_string()),
            PageError::ReadFailed { .. } => AppError::Internal(e.to_string()),
            PageError::Db(e) => AppError::Db(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("{self}");
        }
        (
            status,
            Json(serde_json::json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}
