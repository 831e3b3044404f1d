use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::{Arc, Mutex};

/// Authoritative record for one document
#[derive(Debug, Clone)]
pub struct DocRecord {
    pub doc_id: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Current authoritative revision
    pub rev: i64,
    /// Hex SHA-256 of the current revision's bytes
    pub content_hash: String,
    pub size_bytes: i64,
}

/// Document repository for database operations
#[derive(Clone)]
pub struct DocRepo {
    conn: Arc<Mutex<Connection>>,
}

impl DocRepo {
    /// Create a new DocRepo with the given connection
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Get a document by ID
    pub fn get_doc(&self, doc_id: &str) -> Result<Option<DocRecord>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT doc_id, filename, created_at, updated_at, rev, content_hash, size_bytes
             FROM documents WHERE doc_id = ?",
            [doc_id],
            record_from_row,
        )
        .optional()
    }

    /// Record an accepted revision, creating the document row if needed.
    ///
    /// This performs no concurrency check; callers go through
    /// [`RevisionService::accept`](crate::service::RevisionService::accept),
    /// which holds the per-document lock across check and record.
    pub fn record_revision(
        &self,
        doc_id: &str,
        filename: &str,
        rev: i64,
        content_hash: &str,
        size_bytes: i64,
    ) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp();

        conn.execute(
            "INSERT INTO documents (doc_id, filename, created_at, updated_at, rev, content_hash, size_bytes)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(doc_id) DO UPDATE SET
                 filename = excluded.filename,
                 updated_at = excluded.updated_at,
                 rev = excluded.rev,
                 content_hash = excluded.content_hash,
                 size_bytes = excluded.size_bytes",
            params![doc_id, filename, now, now, rev, content_hash, size_bytes],
        )?;

        Ok(())
    }

    /// All documents, most recently updated first
    pub fn list_docs(&self) -> Result<Vec<DocRecord>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT doc_id, filename, created_at, updated_at, rev, content_hash, size_bytes
             FROM documents ORDER BY updated_at DESC, doc_id ASC",
        )?;

        let docs = stmt
            .query_map([], record_from_row)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(docs)
    }
}

// ===== Helper functions =====

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocRecord> {
    Ok(DocRecord {
        doc_id: row.get(0)?,
        filename: row.get(1)?,
        created_at: timestamp_to_datetime(row.get(2)?),
        updated_at: timestamp_to_datetime(row.get(3)?),
        rev: row.get(4)?,
        content_hash: row.get(5)?,
        size_bytes: row.get(6)?,
    })
}

/// Convert Unix timestamp to DateTime<Utc>
fn timestamp_to_datetime(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now)
}
