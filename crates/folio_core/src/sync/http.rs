//! reqwest-backed implementation of [`RemoteStore`].
//!
//! Speaks the revision service's multipart API. Meta fetches carry a short
//! timeout so conflict checks degrade to "offline" quickly instead of
//! blocking; uploads and downloads get a longer one.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::remote::{RemoteDocMeta, RemoteStore};
use crate::error::{FolioError, Result};

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const META_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for the revision service.
#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRemote {
    /// Create a client against a base URL such as `http://localhost:3040`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder().timeout(UPLOAD_TIMEOUT).build()?;
        Ok(Self { base_url, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn upload_form(doc_id: &str, filename: &str, rev: i64, bytes: &[u8]) -> Result<Form> {
        let file = Part::bytes(bytes.to_vec())
            .file_name(filename.to_string())
            .mime_str("application/pdf")?;
        Ok(Form::new()
            .text("docId", doc_id.to_string())
            .text("filename", filename.to_string())
            .text("revClient", rev.to_string())
            .part("file", file))
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn fetch_meta(&self, doc_id: &str) -> Result<RemoteDocMeta> {
        let response = self
            .client
            .get(self.url(&format!("/api/docs/{doc_id}/meta")))
            .timeout(META_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(decode_error(doc_id, response).await);
        }
        Ok(response.json::<RemoteDocMeta>().await?)
    }

    async fn download(&self, doc_id: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.url(&format!("/api/docs/{doc_id}/file")))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(decode_error(doc_id, response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn create(&self, doc_id: &str, filename: &str, rev: i64, bytes: &[u8]) -> Result<i64> {
        let form = Self::upload_form(doc_id, filename, rev, bytes)?;
        let response = self
            .client
            .post(self.url("/api/docs"))
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(decode_error(doc_id, response).await);
        }
        let payload = response.json::<UploadResponse>().await?;
        Ok(payload.rev_server)
    }

    async fn update(&self, doc_id: &str, filename: &str, rev: i64, bytes: &[u8]) -> Result<i64> {
        let form = Self::upload_form(doc_id, filename, rev, bytes)?;
        let response = self
            .client
            .put(self.url(&format!("/api/docs/{doc_id}")))
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(decode_error(doc_id, response).await);
        }
        let payload = response.json::<UploadResponse>().await?;
        Ok(payload.rev_server)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    rev_server: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: Option<String>,
    rev_server: Option<i64>,
}

/// Map a non-success response onto the error taxonomy. A 409 carries the
/// server's current revision and becomes [`FolioError::Conflict`].
async fn decode_error(doc_id: &str, response: reqwest::Response) -> FolioError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let parsed: Option<ErrorBody> = serde_json::from_str(&body).ok();

    match status {
        StatusCode::CONFLICT => match parsed.and_then(|b| b.rev_server) {
            Some(server_rev) => FolioError::Conflict { server_rev },
            None => FolioError::Remote(format!("conflict with unreadable body (409): {body}")),
        },
        StatusCode::NOT_FOUND => FolioError::NotFound(doc_id.to_string()),
        StatusCode::BAD_REQUEST => FolioError::InvalidDocId(doc_id.to_string()),
        _ => {
            let message = parsed
                .and_then(|b| b.error)
                .unwrap_or_else(|| body.trim().to_string());
            if message.is_empty() {
                FolioError::Remote(format!("HTTP {}", status.as_u16()))
            } else {
                FolioError::Remote(format!("{message} ({})", status.as_u16()))
            }
        }
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FolioError::Network("base URL must not be empty".to_string()));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.trim_end_matches('/').to_string())
    } else {
        Err(FolioError::Network(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}
