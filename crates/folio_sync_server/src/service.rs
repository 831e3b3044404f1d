//! Revision acceptance: the optimistic-concurrency core of the server.
//!
//! Revision numbers are assigned by the writer; the server validates
//! rather than generates. Monotonicity is enforced purely by rejection: a
//! proposal that does not strictly advance the document's current revision
//! gets a conflict carrying the server's revision, and the winning proposal
//! becomes the new authoritative value.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use folio_core::{content_hash, is_valid_doc_id};

use crate::db::{DocRecord, DocRepo};
use crate::error::ApiError;
use crate::storage::BlobStore;

/// Coordinates revision acceptance and retrieval per document.
pub struct RevisionService {
    repo: DocRepo,
    blobs: BlobStore,
    /// Per-document locks scoping the check-and-accept sequence; unrelated
    /// documents never contend.
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RevisionService {
    /// Create a service over a repository and a blob store.
    pub fn new(repo: DocRepo, blobs: BlobStore) -> Self {
        Self {
            repo,
            blobs,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn doc_lock(&self, doc_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(doc_id.to_string()).or_default().clone()
    }

    /// Current record for a document.
    pub fn get_doc(&self, doc_id: &str) -> Result<DocRecord, ApiError> {
        if !is_valid_doc_id(doc_id) {
            return Err(ApiError::InvalidDocId(doc_id.to_string()));
        }
        self.repo
            .get_doc(doc_id)?
            .ok_or_else(|| ApiError::NotFound(doc_id.to_string()))
    }

    /// All document records.
    pub fn list_docs(&self) -> Result<Vec<DocRecord>, ApiError> {
        Ok(self.repo.list_docs()?)
    }

    /// Bytes of the document's current revision, verified against the
    /// record's content hash.
    ///
    /// A record pointing at an absent blob, or a blob whose digest no
    /// longer matches, is a consistency fault between index and storage;
    /// it is reported, never silently repaired.
    pub fn latest_bytes(&self, doc_id: &str) -> Result<(DocRecord, Vec<u8>), ApiError> {
        let record = self.get_doc(doc_id)?;

        if !self.blobs.exists(doc_id, record.rev) {
            warn!(doc_id, rev = record.rev, "indexed revision has no blob");
            return Err(ApiError::FileMissing {
                doc_id: doc_id.to_string(),
                rev: record.rev,
            });
        }

        let bytes = self.blobs.read(doc_id, record.rev)?;
        let hash = content_hash(&bytes);
        if hash != record.content_hash {
            return Err(ApiError::StorageFault(format!(
                "content hash mismatch for '{doc_id}' rev {}: index {} vs stored {hash}",
                record.rev, record.content_hash
            )));
        }

        Ok((record, bytes))
    }

    /// Accept a proposed revision iff it strictly advances the document.
    ///
    /// The check-blob-record sequence runs under the document's lock, so
    /// two simultaneous proposals of the same next revision cannot both
    /// succeed; the loser observes the winner's revision in its conflict.
    /// `require_existing` distinguishes the update endpoint (404 on unknown
    /// documents) from the create endpoint (tolerates re-creation).
    pub async fn accept(
        &self,
        doc_id: &str,
        proposed_rev: i64,
        filename: &str,
        bytes: &[u8],
        require_existing: bool,
    ) -> Result<i64, ApiError> {
        if !is_valid_doc_id(doc_id) {
            return Err(ApiError::InvalidDocId(doc_id.to_string()));
        }
        if proposed_rev <= 0 {
            return Err(ApiError::InvalidField(
                "revClient must be a positive integer".to_string(),
            ));
        }

        let lock = self.doc_lock(doc_id);
        let _guard = lock.lock().await;

        let existing = self.repo.get_doc(doc_id)?;
        if require_existing && existing.is_none() {
            return Err(ApiError::NotFound(doc_id.to_string()));
        }
        if let Some(record) = &existing {
            if proposed_rev <= record.rev {
                return Err(ApiError::Conflict {
                    server_rev: record.rev,
                });
            }
        }

        self.blobs.write(doc_id, proposed_rev, bytes)?;
        let hash = content_hash(bytes);
        self.repo
            .record_revision(doc_id, filename, proposed_rev, &hash, bytes.len() as i64)?;

        info!(
            doc_id,
            rev = proposed_rev,
            size = bytes.len(),
            "accepted revision"
        );
        Ok(proposed_rev)
    }
}
