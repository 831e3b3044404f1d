#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Document metadata, outbox jobs, identifier validation, content hashing
pub mod doc;

/// Error (common error types)
pub mod error;

/// Durable local revision store (SQLite)
pub mod store;

/// Synchronization: outbox flusher, conflict coordinator, HTTP remote
pub mod sync;

#[cfg(test)]
pub mod test_utils;

pub use doc::{DocumentMeta, OutboxJob, content_hash, is_valid_doc_id, validate_doc_id};
pub use error::{FolioError, Result};
pub use store::LocalStore;
pub use sync::{
    AlwaysOnline, BackoffPolicy, ConflictNotice, ConflictResolution, Connectivity, FlushOutcome,
    FlushReport, HttpRemote, OnlineFlag, OutboxFlusher, RemoteDocMeta, RemoteStore,
    SyncCoordinator, SyncStatus,
};
