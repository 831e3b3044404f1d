//! Test utilities for folio_core
//!
//! Provides a scripted in-memory implementation of [`RemoteStore`] that
//! mirrors the revision service's monotonicity rule, so flusher and
//! coordinator tests exercise real accept/reject behavior without a server.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{FolioError, Result};
use crate::sync::remote::{RemoteDocMeta, RemoteStore};

#[derive(Debug, Clone)]
struct MockDoc {
    rev: i64,
    filename: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    docs: HashMap<String, MockDoc>,
    /// Upload calls in arrival order, e.g. `"create doc-x rev 1"`
    calls: Vec<String>,
    /// Errors returned by upcoming operations, consumed front-first
    fail_queue: VecDeque<FolioError>,
    /// Simulated latency applied to every operation
    response_delay: Option<Duration>,
    /// Revisions another writer sneaks in before the next upload lands
    pending_advance: i64,
}

/// In-memory mock of the revision service.
///
/// Uses `Arc<Mutex<...>>` so clones share state across tasks.
#[derive(Clone, Default)]
pub struct MockRemote {
    state: Arc<Mutex<MockState>>,
}

impl MockRemote {
    /// Create an empty mock server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document as if another device had already pushed it.
    pub fn seed_doc(&self, doc_id: &str, rev: i64, filename: &str, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.docs.insert(
            doc_id.to_string(),
            MockDoc {
                rev,
                filename: filename.to_string(),
                bytes: bytes.to_vec(),
            },
        );
    }

    /// Script the next operation to fail with the given error.
    pub fn fail_next(&self, err: FolioError) {
        self.state.lock().unwrap().fail_queue.push_back(err);
    }

    /// Apply a latency to every operation.
    pub fn set_response_delay(&self, delay: Duration) {
        self.state.lock().unwrap().response_delay = Some(delay);
    }

    /// Simulate another writer advancing the document by `n` revisions just
    /// before the next upload is checked.
    pub fn advance_before_next_upload(&self, n: i64) {
        self.state.lock().unwrap().pending_advance = n;
    }

    /// Upload calls observed so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Current revision of a document, if the mock server holds it.
    pub fn doc_rev(&self, doc_id: &str) -> Option<i64> {
        self.state.lock().unwrap().docs.get(doc_id).map(|d| d.rev)
    }

    /// Current bytes of a document, if the mock server holds it.
    pub fn doc_bytes(&self, doc_id: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .docs
            .get(doc_id)
            .map(|d| d.bytes.clone())
    }

    async fn simulate_latency(&self) {
        let delay = self.state.lock().unwrap().response_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn take_scripted_failure(&self) -> Option<FolioError> {
        self.state.lock().unwrap().fail_queue.pop_front()
    }

    fn upload(
        &self,
        kind: &str,
        doc_id: &str,
        filename: &str,
        rev: i64,
        bytes: &[u8],
        require_existing: bool,
    ) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{kind} {doc_id} rev {rev}"));

        if state.pending_advance > 0 {
            let advance = state.pending_advance;
            state.pending_advance = 0;
            if let Some(doc) = state.docs.get_mut(doc_id) {
                doc.rev += advance;
            }
        }

        let current = state.docs.get(doc_id).map(|d| d.rev);
        if require_existing && current.is_none() {
            return Err(FolioError::NotFound(doc_id.to_string()));
        }
        if let Some(current) = current {
            if rev <= current {
                return Err(FolioError::Conflict {
                    server_rev: current,
                });
            }
        }

        state.docs.insert(
            doc_id.to_string(),
            MockDoc {
                rev,
                filename: filename.to_string(),
                bytes: bytes.to_vec(),
            },
        );
        Ok(rev)
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn fetch_meta(&self, doc_id: &str) -> Result<RemoteDocMeta> {
        self.simulate_latency().await;
        if let Some(err) = self.take_scripted_failure() {
            return Err(err);
        }
        let state = self.state.lock().unwrap();
        let doc = state
            .docs
            .get(doc_id)
            .ok_or_else(|| FolioError::NotFound(doc_id.to_string()))?;
        Ok(RemoteDocMeta {
            doc_id: doc_id.to_string(),
            rev: doc.rev,
            filename: doc.filename.clone(),
            updated_at: Utc::now(),
        })
    }

    async fn download(&self, doc_id: &str) -> Result<Vec<u8>> {
        self.simulate_latency().await;
        if let Some(err) = self.take_scripted_failure() {
            return Err(err);
        }
        let state = self.state.lock().unwrap();
        state
            .docs
            .get(doc_id)
            .map(|d| d.bytes.clone())
            .ok_or_else(|| FolioError::NotFound(doc_id.to_string()))
    }

    async fn create(&self, doc_id: &str, filename: &str, rev: i64, bytes: &[u8]) -> Result<i64> {
        self.simulate_latency().await;
        if let Some(err) = self.take_scripted_failure() {
            self.state
                .lock()
                .unwrap()
                .calls
                .push(format!("create {doc_id} rev {rev}"));
            return Err(err);
        }
        self.upload("create", doc_id, filename, rev, bytes, false)
    }

    async fn update(&self, doc_id: &str, filename: &str, rev: i64, bytes: &[u8]) -> Result<i64> {
        self.simulate_latency().await;
        if let Some(err) = self.take_scripted_failure() {
            self.state
                .lock()
                .unwrap()
                .calls
                .push(format!("update {doc_id} rev {rev}"));
            return Err(err);
        }
        self.upload("update", doc_id, filename, rev, bytes, true)
    }
}
