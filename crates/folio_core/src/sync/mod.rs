//! Client-side synchronization between the local store and the revision
//! service.
//!
//! # Architecture
//!
//! ```text
//!    Revision Service (HTTP)
//!          ↑↓
//!     RemoteStore (transport seam)
//!          ↑↓
//!  OutboxFlusher / SyncCoordinator
//!          ↑↓
//!      LocalStore (SQLite)
//! ```
//!
//! # Key components
//!
//! - [`OutboxFlusher`] - drains queued local revisions to the server,
//!   FIFO, single-flight, with capped exponential backoff
//! - [`SyncCoordinator`] - classifies local-vs-server state and drives
//!   conflict resolution (keep-local / take-server)
//! - [`RemoteStore`] / [`HttpRemote`] - the transport seam and its
//!   reqwest implementation
//! - [`Connectivity`] - host-injected reachability signal

/// Connectivity signals injected by the host environment
pub mod connectivity;
/// Conflict classification and resolution
pub mod coordinator;
/// Outbox drain loop
pub mod flusher;
/// HTTP implementation of the remote seam
pub mod http;
/// Transport seam between the engine and the revision service
pub mod remote;

pub use connectivity::{AlwaysOnline, Connectivity, OnlineFlag};
pub use coordinator::{ConflictResolution, SyncCoordinator, SyncStatus};
pub use flusher::{BackoffPolicy, ConflictNotice, FlushOutcome, FlushReport, OutboxFlusher};
pub use http::HttpRemote;
pub use remote::{RemoteDocMeta, RemoteStore};
