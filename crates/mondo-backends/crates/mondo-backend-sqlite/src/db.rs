//! Per-database sqlite handle
//!
//! One database maps to one sqlite file named after the validated
//! database name. The handle owns the connection behind a mutex and
//! bootstraps the three-table storage schema on open.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};

use mondo_core::{MondoError, Result};

/// Storage schema: collections, documents keyed by `(collection_id,
/// _id)`, and index metadata.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS collections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    options TEXT NOT NULL DEFAULT '{}'
);
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    _id TEXT NOT NULL,
    data TEXT NOT NULL DEFAULT '{}',
    UNIQUE (collection_id, _id)
);
CREATE INDEX IF NOT EXISTS idx_documents_id ON documents(_id);
CREATE TABLE IF NOT EXISTS indexes (
    collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    key TEXT NOT NULL,
    options TEXT NOT NULL DEFAULT '{}',
    UNIQUE (collection_id, name)
);
";

/// Open handle to one database file.
pub(crate) struct DatabaseHandle {
    conn: Arc<Mutex<Connection>>,
}

impl DatabaseHandle {
    /// Open (creating if needed) the sqlite file for a validated database
    /// name and bootstrap the schema.
    pub fn open(data_dir: &Path, name: &str) -> Result<Self> {
        let path = data_dir.join(format!("{}.sqlite", name));
        tracing::info!(db = %name, path = %path.display(), "opening database file");

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&path, flags).map_err(|e| {
            MondoError::Storage(format!(
                "failed to open database file '{}': {}",
                path.display(),
                e
            ))
        })?;

        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| MondoError::Storage(format!("failed to enable foreign keys: {}", e)))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| MondoError::Storage(format!("failed to set journal mode: {}", e)))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| MondoError::Storage(format!("failed to set synchronous mode: {}", e)))?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| MondoError::Storage(format!("failed to bootstrap schema: {}", e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn conn(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    /// Look up a collection's internal id.
    pub fn collection_id(&self, collection: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id FROM collections WHERE name = ?1")
            .map_err(storage_err)?;
        let mut rows = stmt.query([collection]).map_err(storage_err)?;
        match rows.next().map_err(storage_err)? {
            Some(row) => Ok(Some(row.get(0).map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    /// Look up a collection's id, creating the collection on first use
    /// the way an insert into a fresh namespace does.
    pub fn collection_id_or_create(&self, collection: &str, options: &str) -> Result<i64> {
        if let Some(id) = self.collection_id(collection)? {
            return Ok(id);
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO collections (name, options) VALUES (?1, ?2)",
            (collection, options),
        )
        .map_err(storage_err)?;
        drop(conn);
        self.collection_id(collection)?
            .ok_or_else(|| MondoError::Internal("collection creation raced a drop".into()))
    }
}

pub(crate) fn storage_err(e: rusqlite::Error) -> MondoError {
    MondoError::Storage(e.to_string())
}

/// Map a constraint violation on `(collection_id, _id)` to the
/// duplicate-key error the wire surfaces as 11000.
pub(crate) fn insert_err(id: &str, e: rusqlite::Error) -> MondoError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &e {
        if failure.code == rusqlite::ErrorCode::ConstraintViolation {
            return MondoError::DuplicateKey(format!("_id '{}' already exists", id));
        }
    }
    storage_err(e)
}
