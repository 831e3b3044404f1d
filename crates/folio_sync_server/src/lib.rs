//! Folio Sync Server
//!
//! The authoritative revision service for Folio documents. Clients number
//! their own revisions; the server validates rather than allocates, and a
//! proposal that does not strictly advance a document's current revision is
//! rejected with a 409 carrying the server's revision.
//!
//! ## Features
//!
//! - **Optimistic-concurrency acceptance**: per-document atomic
//!   check-and-accept, no cross-document locking
//! - **Content-addressed integrity**: SHA-256 of every stored revision,
//!   verified when the latest bytes are served
//! - **Write-once blobs**: one immutable file per accepted revision
//!
//! ## Environment Variables
//!
//! - `HOST`: Server host (default: 0.0.0.0)
//! - `PORT`: Server port (default: 3040)
//! - `DATABASE_PATH`: Path to SQLite database (default: ./folio_sync.db)
//! - `STORAGE_DIR`: Root directory for revision blobs (default: ./data)
//! - `CORS_ORIGINS`: Comma-separated list of allowed origins
//! - `MAX_UPLOAD_MB`: Upload size limit in MiB (default: 50)

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod service;
pub mod storage;

pub use config::Config;
