use thiserror::Error;

/// Unified error type for folio operations
#[derive(Debug, Error)]
pub enum FolioError {
    // Validation errors - surface immediately, never retried
    #[error("invalid document id '{0}': expected 8-80 characters of [A-Za-z0-9_-]")]
    InvalidDocId(String),

    #[error("document '{0}' not found")]
    NotFound(String),

    /// Stale revision rejected by the server; carries the server's current
    /// revision so the conflict coordinator can classify and resolve.
    #[error("stale revision: server is at rev {server_rev}")]
    Conflict {
        /// The server's current authoritative revision
        server_rev: i64,
    },

    // Transient transport errors - absorbed by the flusher's retry loop
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    /// Unexpected server-side failure, original message preserved
    #[error("server error: {0}")]
    Remote(String),

    // Local storage errors
    #[error("local store error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Inconsistency between indexed metadata and stored bytes; reported,
    /// never silently repaired.
    #[error("storage fault: {0}")]
    StorageFault(String),
}

/// Result type alias for folio operations
pub type Result<T> = std::result::Result<T, FolioError>;

impl FolioError {
    /// Whether the flusher may retry after this error.
    ///
    /// Conflicts are deliberately not transient: retrying an upload that is
    /// behind the server's revision can never succeed, so they route to the
    /// conflict coordinator instead.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FolioError::Network(_) | FolioError::Timeout | FolioError::Remote(_)
        )
    }
}

impl From<reqwest::Error> for FolioError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FolioError::Timeout
        } else {
            FolioError::Network(err.to_string())
        }
    }
}
