//! Filesystem blob storage for accepted revisions.
//!
//! One immutable file per accepted `(document, revision)` pair, at
//! `pdfs/<docId>/rev-<rev>.pdf` under the storage root. Files are never
//! overwritten; a revision's bytes are fixed the moment it is accepted.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Write-once blob store rooted at the configured storage directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Create a store, ensuring the root directory exists.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Path of the blob for `(doc_id, rev)`.
    ///
    /// `doc_id` has already passed identifier validation, so it cannot
    /// contain path separators.
    pub fn blob_path(&self, doc_id: &str, rev: i64) -> PathBuf {
        self.root
            .join("pdfs")
            .join(doc_id)
            .join(format!("rev-{rev}.pdf"))
    }

    /// Whether a blob exists for `(doc_id, rev)`.
    pub fn exists(&self, doc_id: &str, rev: i64) -> bool {
        self.blob_path(doc_id, rev).is_file()
    }

    /// Persist bytes for `(doc_id, rev)`. Write-once: an existing blob is
    /// left untouched.
    pub fn write(&self, doc_id: &str, rev: i64, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.blob_path(doc_id, rev);
        if path.is_file() {
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Read the bytes of `(doc_id, rev)`.
    pub fn read(&self, doc_id: &str, rev: i64) -> io::Result<Vec<u8>> {
        fs::read(self.blob_path(doc_id, rev))
    }

    /// The storage root this store was opened at.
    pub fn root(&self) -> &Path {
        &self.root
    }
}
