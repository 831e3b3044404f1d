//! Conflict detection and resolution between the local store and the
//! server.
//!
//! Binary documents cannot be merged, so resolution is strictly
//! keep-one-side: either the device's copy is pushed (and re-validated by
//! the server's monotonicity rule at upload time), or the server's copy
//! replaces the local one and superseded queued edits are pruned.

use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::Arc;

use crate::doc::{DocumentMeta, validate_doc_id};
use crate::error::{FolioError, Result};
use crate::store::LocalStore;
use super::flusher::{FlushOutcome, OutboxFlusher};
use super::remote::RemoteStore;

/// Relationship between the local copy and the server copy of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// The store has never seen the document, or neither side has content
    Unknown,
    /// Local and server hold the same revision
    Synced,
    /// The device is ahead; the outbox flusher should run
    PushNeeded,
    /// The server advanced past what this device last saw
    Conflict {
        /// The server's current revision
        server_rev: i64,
    },
    /// The server could not be reached within the bounded timeout
    Offline,
    /// Classification failed for another reason
    Error(String),
}

/// How to resolve a conflict. There is no content merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Keep the device's copy and push it; re-validated at upload time
    KeepLocal,
    /// Take the server's copy and discard superseded queued edits
    TakeServer,
}

impl FromStr for ConflictResolution {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "keep_local" | "keep-local" => Ok(ConflictResolution::KeepLocal),
            "server" | "take_server" | "take-server" | "remote" => {
                Ok(ConflictResolution::TakeServer)
            }
            _ => Err(()),
        }
    }
}

/// Classifies per-document sync state and drives resolution.
pub struct SyncCoordinator<R: RemoteStore> {
    store: Arc<LocalStore>,
    remote: Arc<R>,
    flusher: Arc<OutboxFlusher<R>>,
}

impl<R: RemoteStore + 'static> SyncCoordinator<R> {
    /// Create a coordinator sharing the flusher's store and remote.
    pub fn new(store: Arc<LocalStore>, remote: Arc<R>, flusher: Arc<OutboxFlusher<R>>) -> Self {
        Self {
            store,
            remote,
            flusher,
        }
    }

    /// Classify a document's state without acting on it.
    ///
    /// Transport failures degrade to [`SyncStatus::Offline`] rather than
    /// propagating; the meta fetch carries a bounded timeout.
    pub async fn check(&self, doc_id: &str) -> Result<SyncStatus> {
        validate_doc_id(doc_id)?;
        let Some(meta) = self.store.meta(doc_id)? else {
            return Ok(SyncStatus::Unknown);
        };

        match self.remote.fetch_meta(doc_id).await {
            Ok(remote) => Ok(match remote.rev.cmp(&meta.rev_local) {
                Ordering::Equal => SyncStatus::Synced,
                Ordering::Less => SyncStatus::PushNeeded,
                Ordering::Greater => SyncStatus::Conflict {
                    server_rev: remote.rev,
                },
            }),
            // The server has never seen this document; local content wants
            // pushing, an empty local doc has nothing to reconcile.
            Err(FolioError::NotFound(_)) => Ok(if meta.rev_local > 0 {
                SyncStatus::PushNeeded
            } else {
                SyncStatus::Unknown
            }),
            Err(FolioError::Network(_)) | Err(FolioError::Timeout) => Ok(SyncStatus::Offline),
            Err(err) => Ok(SyncStatus::Error(err.to_string())),
        }
    }

    /// Classify and apply the non-interactive policies.
    ///
    /// `PushNeeded` invokes the flusher. A conflict on a document with no
    /// pending local edits auto-resolves by taking the server copy (the
    /// first-load case); a conflict on a diverged document is returned for
    /// the user to resolve.
    pub async fn sync(&self, doc_id: &str) -> Result<SyncStatus> {
        match self.check(doc_id).await? {
            SyncStatus::PushNeeded => self.push_and_reclassify(doc_id).await,
            SyncStatus::Conflict { server_rev } => {
                if self.store.pending_for_doc(doc_id)? == 0 {
                    log::info!("auto-resolving '{doc_id}' to server rev {server_rev}");
                    self.take_server(doc_id).await?;
                    Ok(SyncStatus::Synced)
                } else {
                    Ok(SyncStatus::Conflict { server_rev })
                }
            }
            status => Ok(status),
        }
    }

    /// Apply a user-chosen resolution to a conflicted document.
    pub async fn resolve(
        &self,
        doc_id: &str,
        resolution: ConflictResolution,
    ) -> Result<SyncStatus> {
        match resolution {
            ConflictResolution::TakeServer => {
                self.take_server(doc_id).await?;
                Ok(SyncStatus::Synced)
            }
            ConflictResolution::KeepLocal => self.keep_local(doc_id).await,
        }
    }

    /// Replace local state with the server's current revision.
    ///
    /// Funnels through `ingest_revision(from_server = true)`, which also
    /// prunes queued edits the server copy supersedes.
    pub async fn take_server(&self, doc_id: &str) -> Result<DocumentMeta> {
        let remote_meta = self.remote.fetch_meta(doc_id).await?;
        let bytes = self.remote.download(doc_id).await?;
        let meta = self
            .store
            .ingest_revision(doc_id, &bytes, remote_meta.rev, true)?;
        let meta = if meta.filename != remote_meta.filename {
            self.store
                .upsert_meta(doc_id, |m| m.filename = remote_meta.filename.clone())?
        } else {
            meta
        };
        log::info!("took server rev {} for '{doc_id}'", remote_meta.rev);
        Ok(meta)
    }

    /// Keep the device's copy: re-stamp its latest content above the
    /// server's revision and push.
    ///
    /// Not a guaranteed resolution — the push is itself checked by the
    /// server's monotonicity rule, so if another writer advanced the server
    /// in the interim the flush reports a fresh conflict and the cycle
    /// repeats.
    pub async fn keep_local(&self, doc_id: &str) -> Result<SyncStatus> {
        let remote_meta = self.remote.fetch_meta(doc_id).await?;
        let local = self
            .store
            .meta(doc_id)?
            .ok_or_else(|| FolioError::NotFound(doc_id.to_string()))?;
        let bytes = self.store.latest_blob(doc_id)?.ok_or_else(|| {
            FolioError::StorageFault(format!(
                "no blob for latest revision of '{doc_id}' (rev {})",
                local.rev_local
            ))
        })?;

        // Queued revisions at or below the server's are unacceptable by the
        // monotonicity rule; drop them before queueing the re-stamp.
        self.store.prune_doc_jobs(doc_id, remote_meta.rev)?;
        let next_rev = remote_meta.rev.max(local.rev_local) + 1;
        self.store.ingest_revision(doc_id, &bytes, next_rev, false)?;
        log::info!("re-stamped '{doc_id}' as rev {next_rev} to keep local content");

        self.push_and_reclassify(doc_id).await
    }

    async fn push_and_reclassify(&self, doc_id: &str) -> Result<SyncStatus> {
        match self.flusher.flush().await? {
            FlushOutcome::Ran(report) => {
                if let Some(conflict) = report.conflicts.iter().find(|c| c.doc_id == doc_id) {
                    return Ok(SyncStatus::Conflict {
                        server_rev: conflict.server_rev,
                    });
                }
                if self.store.pending_for_doc(doc_id)? == 0 {
                    Ok(SyncStatus::Synced)
                } else {
                    Ok(SyncStatus::PushNeeded)
                }
            }
            FlushOutcome::Offline { .. } => Ok(SyncStatus::Offline),
            FlushOutcome::Coalesced { .. } => Ok(SyncStatus::PushNeeded),
        }
    }
}
