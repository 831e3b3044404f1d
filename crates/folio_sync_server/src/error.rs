use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the HTTP API.
///
/// The `IntoResponse` impl is the single place status codes are assigned:
/// validation 400, unknown documents (and missing blobs) 404, stale
/// revisions 409 with the server's current revision in the body, everything
/// else 500 with the original message preserved.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid document id '{0}': expected 8-80 characters of [A-Za-z0-9_-]")]
    InvalidDocId(String),

    #[error("{0}")]
    InvalidField(String),

    #[error("document '{0}' not found")]
    NotFound(String),

    #[error("file for document '{doc_id}' rev {rev} is missing")]
    FileMissing { doc_id: String, rev: i64 },

    #[error("stale revision: server is at rev {server_rev}")]
    Conflict { server_rev: i64 },

    /// Metadata and stored bytes disagree; reported, never silently repaired
    #[error("storage fault: {0}")]
    StorageFault(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidDocId(_) | ApiError::InvalidField(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) | ApiError::FileMissing { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::StorageFault(_) | ApiError::Db(_) | ApiError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {self}");
        }

        let body = match &self {
            ApiError::Conflict { server_rev } => json!({
                "error": self.to_string(),
                "revServer": server_rev,
            }),
            _ => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
