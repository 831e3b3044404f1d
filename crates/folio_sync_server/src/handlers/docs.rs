//! HTTP surface of the revision service.
//!
//! Uploads are multipart (`docId`, `filename`, `revClient`, `file`); all
//! JSON bodies use camelCase. The file endpoint serves the current revision
//! with `cache-control: no-store` so stale copies never linger in caches
//! between syncs.

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, put},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::ApiError;
use crate::service::RevisionService;

/// Shared state for document handlers
#[derive(Clone)]
pub struct DocsState {
    pub service: Arc<RevisionService>,
}

/// Document metadata response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocMetaResponse {
    pub doc_id: String,
    pub rev: i64,
    pub filename: String,
    pub updated_at: DateTime<Utc>,
}

/// Accepted-upload response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub doc_id: String,
    pub rev_server: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Document list entry
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocSummaryResponse {
    pub doc_id: String,
    pub rev: i64,
    pub filename: String,
    pub updated_at: DateTime<Utc>,
    pub size_bytes: i64,
}

/// Create document routes
pub fn doc_routes(state: DocsState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/docs", axum::routing::post(create_doc).get(list_docs))
        .route("/docs/{doc_id}", put(update_doc))
        .route("/docs/{doc_id}/meta", get(get_meta))
        .route("/docs/{doc_id}/file", get(get_file))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// GET /api/health - liveness probe
async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

/// GET /api/docs - list all documents
async fn list_docs(State(state): State<DocsState>) -> Result<Json<Vec<DocSummaryResponse>>, ApiError> {
    let docs = state
        .service
        .list_docs()?
        .into_iter()
        .map(|record| DocSummaryResponse {
            doc_id: record.doc_id,
            rev: record.rev,
            filename: record.filename,
            updated_at: record.updated_at,
            size_bytes: record.size_bytes,
        })
        .collect();
    Ok(Json(docs))
}

/// GET /api/docs/:doc_id/meta - current revision metadata
async fn get_meta(
    State(state): State<DocsState>,
    Path(doc_id): Path<String>,
) -> Result<Json<DocMetaResponse>, ApiError> {
    let record = state.service.get_doc(&doc_id)?;
    Ok(Json(DocMetaResponse {
        doc_id: record.doc_id,
        rev: record.rev,
        filename: record.filename,
        updated_at: record.updated_at,
    }))
}

/// GET /api/docs/:doc_id/file - bytes of the current revision
async fn get_file(
    State(state): State<DocsState>,
    Path(doc_id): Path<String>,
) -> Result<Response, ApiError> {
    let (record, bytes) = state.service.latest_bytes(&doc_id)?;

    let headers = [
        (header::CONTENT_TYPE, "application/pdf".to_string()),
        (header::CACHE_CONTROL, "no-store".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{}\"", record.filename),
        ),
    ];
    Ok((headers, bytes).into_response())
}

/// POST /api/docs - upload a revision, creating the document if needed
async fn create_doc(
    State(state): State<DocsState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let upload = UploadFields::read(multipart).await?;
    let doc_id = upload.require_doc_id()?;

    let rev_server = state
        .service
        .accept(&doc_id, upload.rev_client()?, &upload.filename(&doc_id), upload.bytes()?, false)
        .await?;

    Ok(Json(UploadResponse {
        url: Some(format!("/api/docs/{doc_id}/file")),
        doc_id,
        rev_server,
    }))
}

/// PUT /api/docs/:doc_id - upload a new revision of an existing document
async fn update_doc(
    State(state): State<DocsState>,
    Path(doc_id): Path<String>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let upload = UploadFields::read(multipart).await?;
    if let Some(body_doc_id) = &upload.doc_id {
        if body_doc_id != &doc_id {
            return Err(ApiError::InvalidField(format!(
                "docId mismatch: path '{doc_id}' vs body '{body_doc_id}'"
            )));
        }
    }

    let rev_server = state
        .service
        .accept(&doc_id, upload.rev_client()?, &upload.filename(&doc_id), upload.bytes()?, true)
        .await?;

    Ok(Json(UploadResponse {
        doc_id,
        rev_server,
        url: None,
    }))
}

/// Fields of a multipart upload request.
#[derive(Debug, Default)]
struct UploadFields {
    doc_id: Option<String>,
    filename: Option<String>,
    rev_client: Option<i64>,
    bytes: Option<Vec<u8>>,
}

impl UploadFields {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut fields = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::InvalidField(format!("malformed multipart body: {e}")))?
        {
            match field.name() {
                Some("docId") => fields.doc_id = Some(read_text(field).await?),
                Some("filename") => fields.filename = Some(read_text(field).await?),
                Some("revClient") => {
                    let raw = read_text(field).await?;
                    let rev = raw.trim().parse().map_err(|_| {
                        ApiError::InvalidField(format!("revClient must be an integer, got '{raw}'"))
                    })?;
                    fields.rev_client = Some(rev);
                }
                Some("file") => {
                    let from_part = field.file_name().map(str::to_string);
                    if fields.filename.is_none() {
                        fields.filename = from_part;
                    }
                    let bytes = field.bytes().await.map_err(|e| {
                        ApiError::InvalidField(format!("failed to read file field: {e}"))
                    })?;
                    fields.bytes = Some(bytes.to_vec());
                }
                _ => {}
            }
        }

        Ok(fields)
    }

    fn require_doc_id(&self) -> Result<String, ApiError> {
        self.doc_id
            .clone()
            .ok_or_else(|| ApiError::InvalidField("missing docId field".to_string()))
    }

    fn rev_client(&self) -> Result<i64, ApiError> {
        self.rev_client
            .ok_or_else(|| ApiError::InvalidField("missing revClient field".to_string()))
    }

    fn bytes(&self) -> Result<&[u8], ApiError> {
        self.bytes
            .as_deref()
            .ok_or_else(|| ApiError::InvalidField("missing file field".to_string()))
    }

    fn filename(&self, doc_id: &str) -> String {
        self.filename
            .clone()
            .unwrap_or_else(|| format!("{doc_id}.pdf"))
    }
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    let name = field.name().unwrap_or("<unnamed>").to_string();
    field
        .text()
        .await
        .map_err(|e| ApiError::InvalidField(format!("failed to read field '{name}': {e}")))
}
