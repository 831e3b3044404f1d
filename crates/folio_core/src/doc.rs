//! Document metadata and outbox types shared across the sync engine.
//!
//! Identifiers are caller-supplied and opaque; both the client store and the
//! revision service validate them against the same rules before touching any
//! state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{FolioError, Result};

/// Client-side metadata for one document.
///
/// Created on first ingestion, mutated on every local save and every
/// successful sync, never deleted implicitly. All mutation goes through
/// [`LocalStore::upsert_meta`](crate::store::LocalStore::upsert_meta).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    /// Opaque stable identifier shared by client and server
    pub doc_id: String,

    /// Display filename, updated on save and when taking a server copy
    pub filename: String,

    /// When this device first saw the document
    pub created_at: DateTime<Utc>,

    /// Last local mutation of any kind
    pub updated_at: DateTime<Utc>,

    /// Highest revision this device has produced or accepted; monotonically
    /// non-decreasing
    pub rev_local: i64,

    /// Last revision the device knows the server holds
    pub rev_server: Option<i64>,

    /// When the server last confirmed a revision from or to this device
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl DocumentMeta {
    /// Fresh default for a document the store has never seen.
    pub(crate) fn fresh(doc_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            filename: format!("{doc_id}.pdf"),
            created_at: now,
            updated_at: now,
            rev_local: 0,
            rev_server: None,
            last_synced_at: None,
        }
    }

    /// True once the device holds revisions the server has not confirmed.
    pub fn has_unsynced_edits(&self) -> bool {
        match self.rev_server {
            Some(rev_server) => self.rev_local > rev_server,
            None => self.rev_local > 0,
        }
    }
}

/// A queued, not-yet-confirmed upload of one local revision.
///
/// At most one job exists per `(doc_id, rev)`; the id is the composite key.
#[derive(Debug, Clone)]
pub struct OutboxJob {
    /// `"{doc_id}:{rev}"`
    pub id: String,

    /// Document this revision belongs to
    pub doc_id: String,

    /// The revision queued for upload
    pub rev: i64,

    /// Full content of the revision
    pub bytes: Vec<u8>,

    /// Enqueue time; the flush order key
    pub created_at: DateTime<Utc>,

    /// Number of failed upload attempts so far
    pub tries: u32,

    /// Message of the most recent failure, for status surfaces
    pub last_error: Option<String>,
}

/// Compose the outbox job id for a `(document, revision)` pair.
pub fn outbox_job_id(doc_id: &str, rev: i64) -> String {
    format!("{doc_id}:{rev}")
}

/// Check a document identifier against the shared client/server rules:
/// 8-80 characters of `[A-Za-z0-9_-]`.
pub fn is_valid_doc_id(doc_id: &str) -> bool {
    (8..=80).contains(&doc_id.len())
        && doc_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Validate a document identifier, failing with [`FolioError::InvalidDocId`].
pub fn validate_doc_id(doc_id: &str) -> Result<()> {
    if is_valid_doc_id(doc_id) {
        Ok(())
    } else {
        Err(FolioError::InvalidDocId(doc_id.to_string()))
    }
}

/// Hex SHA-256 digest of document content, as stored in server records and
/// used to detect storage corruption.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
