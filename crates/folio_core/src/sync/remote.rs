//! Transport seam between the sync engine and the revision service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Server-side view of a document, as returned by the meta endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocMeta {
    /// Document identifier
    pub doc_id: String,
    /// The server's current authoritative revision
    pub rev: i64,
    /// Filename recorded with the current revision
    pub filename: String,
    /// When the server last accepted a revision
    pub updated_at: DateTime<Utc>,
}

/// Operations the sync engine needs from the authoritative server.
///
/// `create` and `update` return the server-confirmed revision. A proposal
/// that does not strictly advance the server's revision fails with
/// [`FolioError::Conflict`](crate::error::FolioError::Conflict) carrying the
/// server's current revision; the flusher routes that to the conflict
/// coordinator instead of retrying.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Current server metadata for a document.
    async fn fetch_meta(&self, doc_id: &str) -> Result<RemoteDocMeta>;

    /// Bytes of the server's current revision.
    async fn download(&self, doc_id: &str) -> Result<Vec<u8>>;

    /// Upload a document the server has never confirmed for this device.
    async fn create(&self, doc_id: &str, filename: &str, rev: i64, bytes: &[u8]) -> Result<i64>;

    /// Upload a new revision of a document the server already holds.
    async fn update(&self, doc_id: &str, filename: &str, rev: i64, bytes: &[u8]) -> Result<i64>;
}
