//! Durable per-device storage: document metadata, immutable blob revisions,
//! and the outbox queue.
//!
//! This is pure storage; it never touches the network. All revision
//! bookkeeping funnels through [`LocalStore::ingest_revision`], which is the
//! single entry point for both "save locally" and "accept server copy".
//!
//! # Thread safety
//!
//! The connection is wrapped in a `Mutex`; every public operation takes the
//! lock exactly once, so read-modify-write sequences (notably
//! [`LocalStore::upsert_meta`]) are atomic within the process. SQLite itself
//! is used in serialized threading mode.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::doc::{DocumentMeta, OutboxJob, outbox_job_id, validate_doc_id};
use crate::error::Result;

const SCHEMA: &str = r#"
-- Per-document metadata; rev_local is the highest revision this device
-- has produced or accepted
CREATE TABLE IF NOT EXISTS documents (
    doc_id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    rev_local INTEGER NOT NULL DEFAULT 0,
    rev_server INTEGER,
    last_synced_at INTEGER
);

-- One immutable blob per (document, revision); write-once, never overwritten
CREATE TABLE IF NOT EXISTS blobs (
    doc_id TEXT NOT NULL,
    rev INTEGER NOT NULL,
    bytes BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (doc_id, rev)
);

-- Pending uploads, drained FIFO by creation time
CREATE TABLE IF NOT EXISTS outbox (
    id TEXT PRIMARY KEY,
    doc_id TEXT NOT NULL,
    rev INTEGER NOT NULL,
    bytes BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    tries INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_outbox_created ON outbox(created_at);
CREATE INDEX IF NOT EXISTS idx_outbox_doc ON outbox(doc_id, rev);
"#;

/// SQLite-backed local revision store.
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Open or create a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or if schema
    /// initialization fails.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store for testing. Data is lost on drop.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ===== Document metadata =====

    /// Get the metadata for a document, if the store has seen it.
    pub fn meta(&self, doc_id: &str) -> Result<Option<DocumentMeta>> {
        validate_doc_id(doc_id)?;
        let conn = self.conn.lock().unwrap();
        read_meta(&conn, doc_id)
    }

    /// All document metadata known to this device.
    pub fn list_documents(&self) -> Result<Vec<DocumentMeta>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT doc_id, filename, created_at, updated_at, rev_local, rev_server, last_synced_at
             FROM documents ORDER BY updated_at DESC",
        )?;
        let metas = stmt
            .query_map([], meta_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(metas)
    }

    /// Atomically read-modify-write a document's metadata.
    ///
    /// Reads the current meta (or synthesizes a fresh default with
    /// `rev_local = 0`), applies `mutator`, stamps `updated_at`, persists,
    /// and returns the new meta. This is the only sanctioned way to mutate
    /// metadata; the lock is held across the whole sequence so concurrent
    /// mutators cannot lose each other's updates.
    pub fn upsert_meta(
        &self,
        doc_id: &str,
        mutator: impl FnOnce(&mut DocumentMeta),
    ) -> Result<DocumentMeta> {
        validate_doc_id(doc_id)?;
        let conn = self.conn.lock().unwrap();
        upsert_meta_in(&conn, doc_id, mutator)
    }

    // ===== Blob revisions =====

    /// Store bytes under `(doc_id, rev)`. Idempotent: an existing revision
    /// is left untouched.
    pub fn put_blob(&self, doc_id: &str, rev: i64, bytes: &[u8]) -> Result<()> {
        validate_doc_id(doc_id)?;
        let conn = self.conn.lock().unwrap();
        put_blob_in(&conn, doc_id, rev, bytes, Utc::now())
    }

    /// Bytes of a specific revision, if present.
    pub fn blob(&self, doc_id: &str, rev: i64) -> Result<Option<Vec<u8>>> {
        validate_doc_id(doc_id)?;
        let conn = self.conn.lock().unwrap();
        read_blob(&conn, doc_id, rev)
    }

    /// Bytes of the document's latest local revision (`meta.rev_local`), or
    /// `None` if metadata or blob is absent.
    pub fn latest_blob(&self, doc_id: &str) -> Result<Option<Vec<u8>>> {
        validate_doc_id(doc_id)?;
        let conn = self.conn.lock().unwrap();
        let Some(meta) = read_meta(&conn, doc_id)? else {
            return Ok(None);
        };
        read_blob(&conn, doc_id, meta.rev_local)
    }

    // ===== Revision ingestion =====

    /// Record a new revision of a document, from the local editor or from
    /// the server.
    ///
    /// In one transaction: stores the blob, merges `rev_local = max(rev_local,
    /// rev)`, and either (server origin) records `rev_server`/`last_synced_at`
    /// and prunes outbox jobs with `job.rev <= rev`, or (local origin)
    /// enqueues an outbox job for this revision.
    pub fn ingest_revision(
        &self,
        doc_id: &str,
        bytes: &[u8],
        rev: i64,
        from_server: bool,
    ) -> Result<DocumentMeta> {
        validate_doc_id(doc_id)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let meta = ingest_in(&tx, doc_id, bytes, rev, from_server, None)?;
        tx.commit()?;
        Ok(meta)
    }

    /// Editor boundary: persist freshly saved bytes as the next local
    /// revision (`rev_local + 1`) and queue them for upload.
    pub fn save_local(&self, doc_id: &str, filename: &str, bytes: &[u8]) -> Result<DocumentMeta> {
        validate_doc_id(doc_id)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let rev = read_meta(&tx, doc_id)?.map_or(1, |meta| meta.rev_local + 1);
        let meta = ingest_in(&tx, doc_id, bytes, rev, false, Some(filename))?;
        tx.commit()?;
        Ok(meta)
    }

    // ===== Outbox =====

    /// Queue a revision for upload. Idempotent: a job with the same
    /// `(doc_id, rev)` already in the outbox is left as-is. Returns whether
    /// a new job was created.
    pub fn enqueue_outbox_job(&self, doc_id: &str, rev: i64, bytes: &[u8]) -> Result<bool> {
        validate_doc_id(doc_id)?;
        let conn = self.conn.lock().unwrap();
        enqueue_job_in(&conn, doc_id, rev, bytes, Utc::now())
    }

    /// All pending jobs, FIFO by creation time.
    pub fn list_outbox(&self) -> Result<Vec<OutboxJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, doc_id, rev, bytes, created_at, tries, last_error
             FROM outbox ORDER BY created_at ASC, rowid ASC",
        )?;
        let jobs = stmt
            .query_map([], job_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Number of pending jobs across all documents.
    pub fn outbox_len(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Number of pending jobs for one document.
    pub fn pending_for_doc(&self, doc_id: &str) -> Result<usize> {
        validate_doc_id(doc_id)?;
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM outbox WHERE doc_id = ?",
            [doc_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Record a failed attempt against a job; returns the new try count.
    pub fn bump_tries(&self, id: &str, error: &str) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE outbox SET tries = tries + 1, last_error = ? WHERE id = ?",
            params![error, id],
        )?;
        let tries: u32 = conn
            .query_row("SELECT tries FROM outbox WHERE id = ?", [id], |row| {
                row.get(0)
            })
            .optional()?
            .unwrap_or(0);
        Ok(tries)
    }

    /// Remove a job after the server confirmed its revision.
    pub fn remove_job(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM outbox WHERE id = ?", [id])?;
        Ok(())
    }

    /// Remove jobs for one document whose revision can no longer be
    /// accepted (`rev <= up_to_rev`). Returns how many were removed.
    pub fn prune_doc_jobs(&self, doc_id: &str, up_to_rev: i64) -> Result<usize> {
        validate_doc_id(doc_id)?;
        let conn = self.conn.lock().unwrap();
        prune_doc_jobs_in(&conn, doc_id, up_to_rev)
    }

    /// Sweep the whole outbox against current metadata: drops any job with
    /// `rev <= rev_server` of its document, and any job whose document no
    /// longer exists. Returns how many were removed.
    pub fn prune_obsolete(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM outbox WHERE id IN (
                 SELECT o.id FROM outbox o
                 LEFT JOIN documents d ON d.doc_id = o.doc_id
                 WHERE d.doc_id IS NULL
                    OR (d.rev_server IS NOT NULL AND o.rev <= d.rev_server)
             )",
            [],
        )?;
        Ok(removed)
    }
}

// ===== Internal helpers (callers hold the connection lock) =====

fn meta_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentMeta> {
    Ok(DocumentMeta {
        doc_id: row.get(0)?,
        filename: row.get(1)?,
        created_at: timestamp_to_datetime(row.get(2)?),
        updated_at: timestamp_to_datetime(row.get(3)?),
        rev_local: row.get(4)?,
        rev_server: row.get(5)?,
        last_synced_at: row.get::<_, Option<i64>>(6)?.map(timestamp_to_datetime),
    })
}

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxJob> {
    Ok(OutboxJob {
        id: row.get(0)?,
        doc_id: row.get(1)?,
        rev: row.get(2)?,
        bytes: row.get(3)?,
        created_at: timestamp_to_datetime(row.get(4)?),
        tries: row.get(5)?,
        last_error: row.get(6)?,
    })
}

fn read_meta(conn: &Connection, doc_id: &str) -> Result<Option<DocumentMeta>> {
    let meta = conn
        .query_row(
            "SELECT doc_id, filename, created_at, updated_at, rev_local, rev_server, last_synced_at
             FROM documents WHERE doc_id = ?",
            [doc_id],
            meta_from_row,
        )
        .optional()?;
    Ok(meta)
}

fn write_meta(conn: &Connection, meta: &DocumentMeta) -> Result<()> {
    conn.execute(
        "INSERT INTO documents (doc_id, filename, created_at, updated_at, rev_local, rev_server, last_synced_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(doc_id) DO UPDATE SET
             filename = excluded.filename,
             updated_at = excluded.updated_at,
             rev_local = excluded.rev_local,
             rev_server = excluded.rev_server,
             last_synced_at = excluded.last_synced_at",
        params![
            meta.doc_id,
            meta.filename,
            meta.created_at.timestamp(),
            meta.updated_at.timestamp(),
            meta.rev_local,
            meta.rev_server,
            meta.last_synced_at.map(|t| t.timestamp()),
        ],
    )?;
    Ok(())
}

fn upsert_meta_in(
    conn: &Connection,
    doc_id: &str,
    mutator: impl FnOnce(&mut DocumentMeta),
) -> Result<DocumentMeta> {
    let now = Utc::now();
    let mut meta = read_meta(conn, doc_id)?.unwrap_or_else(|| DocumentMeta::fresh(doc_id, now));
    mutator(&mut meta);
    meta.updated_at = now;
    write_meta(conn, &meta)?;
    Ok(meta)
}

fn put_blob_in(
    conn: &Connection,
    doc_id: &str,
    rev: i64,
    bytes: &[u8],
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO blobs (doc_id, rev, bytes, created_at) VALUES (?, ?, ?, ?)",
        params![doc_id, rev, bytes, now.timestamp()],
    )?;
    Ok(())
}

fn read_blob(conn: &Connection, doc_id: &str, rev: i64) -> Result<Option<Vec<u8>>> {
    let bytes = conn
        .query_row(
            "SELECT bytes FROM blobs WHERE doc_id = ? AND rev = ?",
            params![doc_id, rev],
            |row| row.get(0),
        )
        .optional()?;
    Ok(bytes)
}

fn enqueue_job_in(
    conn: &Connection,
    doc_id: &str,
    rev: i64,
    bytes: &[u8],
    now: DateTime<Utc>,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO outbox (id, doc_id, rev, bytes, created_at) VALUES (?, ?, ?, ?, ?)",
        params![
            outbox_job_id(doc_id, rev),
            doc_id,
            rev,
            bytes,
            now.timestamp()
        ],
    )?;
    Ok(inserted > 0)
}

fn prune_doc_jobs_in(conn: &Connection, doc_id: &str, up_to_rev: i64) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM outbox WHERE doc_id = ? AND rev <= ?",
        params![doc_id, up_to_rev],
    )?;
    Ok(removed)
}

fn ingest_in(
    conn: &Connection,
    doc_id: &str,
    bytes: &[u8],
    rev: i64,
    from_server: bool,
    filename: Option<&str>,
) -> Result<DocumentMeta> {
    let now = Utc::now();
    put_blob_in(conn, doc_id, rev, bytes, now)?;

    let meta = upsert_meta_in(conn, doc_id, |meta| {
        meta.rev_local = meta.rev_local.max(rev);
        if let Some(filename) = filename {
            meta.filename = filename.to_string();
        }
        if from_server {
            meta.rev_server = Some(rev);
            meta.last_synced_at = Some(now);
        }
    })?;

    if from_server {
        let pruned = prune_doc_jobs_in(conn, doc_id, rev)?;
        if pruned > 0 {
            log::debug!("pruned {pruned} superseded outbox job(s) for '{doc_id}'");
        }
    } else {
        enqueue_job_in(conn, doc_id, rev, bytes, now)?;
    }

    Ok(meta)
}

/// Convert Unix timestamp to DateTime<Utc>
fn timestamp_to_datetime(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now)
}
