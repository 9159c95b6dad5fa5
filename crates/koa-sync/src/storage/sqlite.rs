//! SQLite Local Store.
//!
//! Rows of every table live in one `records` table keyed by `(tbl, id)` with
//! the row JSON in `data`. Declared indexes become expression indexes over
//! `json_extract(data, '$.<field>')`. The connection is protected by a
//! `parking_lot::ReentrantMutex<RefCell<Connection>>`, the same arrangement
//! the storage backend has always used, so a transaction can hold the lock
//! for its whole lifetime.
//!
//! Schema versioning: the store writes `schema:version` and
//! `schema:signature` into its `meta` table. Opening a file written by a newer
//! build, or one whose declaration drifted without a version bump, fails with
//! a [`SchemaError`]. [`SqliteStore::open_with_recovery`] answers those
//! errors by deleting the database and starting empty. That recovery is
//! lossy: the local store is a disposable mirror of the Remote Store.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::ReentrantMutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;

use crate::error::{KoaError, Result, SchemaError, StorageError};
use crate::schema::{Schema, SchemaVersion};
use crate::types::UPDATED_AT_FIELD;

use super::traits::{validate_batch, LocalStore, TableRows};

const SCHEMA_VERSION_KEY: &str = "schema:version";
const SCHEMA_SIGNATURE_KEY: &str = "schema:signature";
/// Prefix of indexes owned by the declared schema (dropped when undeclared).
const INDEX_PREFIX: &str = "sx_";

// ============================================================================
// Error helpers
// ============================================================================

/// Corruption-class SQLite failures surface as schema errors so recovery can
/// match on them; everything else stays a storage error.
fn classify_open_error(e: rusqlite::Error) -> KoaError {
    match e.sqlite_error_code() {
        Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt) => {
            SchemaError::Corrupt(e.to_string()).into()
        }
        _ => StorageError::Sqlite(e).into(),
    }
}

fn index_name(table: &str, field: &str) -> String {
    format!("{INDEX_PREFIX}{table}__{field}")
}

// ============================================================================
// SqliteStore
// ============================================================================

pub struct SqliteStore {
    conn: ReentrantMutex<RefCell<Connection>>,
    known: HashSet<String>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) a file-backed store at `path`.
    pub fn open(path: impl AsRef<Path>, schema: &Schema) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(classify_open_error)?;
        Self::from_connection(conn, schema, Some(path.to_path_buf()))
    }

    /// Open an in-memory store (useful for tests).
    pub fn open_in_memory(schema: &Schema) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(classify_open_error)?;
        Self::from_connection(conn, schema, None)
    }

    /// Open `path`; on any schema incompatibility destroy the database and
    /// reopen it empty. Other errors propagate unchanged.
    pub fn open_with_recovery(path: impl AsRef<Path>, schema: &Schema) -> Result<Self> {
        let path = path.as_ref();
        match Self::open(path, schema) {
            Err(KoaError::Schema(e)) if e.is_incompatible() => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    declared_version = schema.current_version(),
                    "local schema incompatible; destroying local database (all local rows are lost)"
                );
                destroy(path)?;
                Self::open(path, schema)
            }
            other => other,
        }
    }

    /// Path of the backing file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn from_connection(
        mut conn: Connection,
        schema: &Schema,
        path: Option<PathBuf>,
    ) -> Result<Self> {
        prepare(&conn, path.is_some()).map_err(classify_open_error)?;
        apply_schema(&mut conn, schema.current())?;

        Ok(Self {
            conn: ReentrantMutex::new(RefCell::new(conn)),
            known: schema.tables().iter().map(|t| t.name.clone()).collect(),
            path,
        })
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    /// Execute `f` with a shared reference to the underlying connection.
    fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        f(&conn).map_err(StorageError::Sqlite)
    }

    /// Run `f` inside a transaction. Returning `Err` (or unwinding) drops the
    /// transaction, which rolls it back.
    fn with_transaction<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, StorageError>,
    {
        let guard = self.conn.lock();
        let mut conn = guard.borrow_mut();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    fn check_table(&self, table: &str) -> Result<(), StorageError> {
        if self.known.contains(table) {
            Ok(())
        } else {
            Err(StorageError::UnknownTable(table.to_string()))
        }
    }

    fn parse_row(table: &str, id: &str, data: &str) -> Result<Value, StorageError> {
        serde_json::from_str(data).map_err(|source| StorageError::Serialization {
            table: table.to_string(),
            id: id.to_string(),
            source,
        })
    }
}

/// Delete a database file and its WAL/SHM siblings. Missing files are fine.
pub fn destroy(path: &Path) -> Result<(), StorageError> {
    let mut targets = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        targets.push(PathBuf::from(name));
    }
    for target in targets {
        match std::fs::remove_file(&target) {
            Ok(()) => tracing::debug!(path = %target.display(), "removed database file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

// ============================================================================
// Schema installation
// ============================================================================

fn prepare(conn: &Connection, file_backed: bool) -> rusqlite::Result<()> {
    if file_backed {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;
    }
    conn.execute_batch(
        "PRAGMA busy_timeout=5000;
         CREATE TABLE IF NOT EXISTS records (
            tbl        TEXT NOT NULL,
            id         TEXT NOT NULL,
            data       TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT,
            PRIMARY KEY (tbl, id)
         );
         CREATE INDEX IF NOT EXISTS idx_records_updated
            ON records(tbl, updated_at);
         CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
         );",
    )
}

fn read_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
        row.get(0)
    })
    .optional()
}

fn apply_schema(conn: &mut Connection, declared: &SchemaVersion) -> Result<()> {
    let stored = read_meta(conn, SCHEMA_VERSION_KEY).map_err(classify_open_error)?;

    let from = match stored {
        None => 0,
        Some(raw) => {
            let stored_version: u32 = raw.trim().parse().map_err(|_| {
                SchemaError::Corrupt(format!("unreadable schema version tag \"{raw}\""))
            })?;
            if stored_version > declared.version {
                return Err(SchemaError::VersionMismatch {
                    stored: stored_version,
                    declared: declared.version,
                }
                .into());
            }
            if stored_version == declared.version {
                let signature =
                    read_meta(conn, SCHEMA_SIGNATURE_KEY).map_err(classify_open_error)?;
                if signature.as_deref() != Some(declared.signature().as_str()) {
                    return Err(SchemaError::SignatureMismatch {
                        version: stored_version,
                    }
                    .into());
                }
                return Ok(());
            }
            stored_version
        }
    };

    if from > 0 {
        tracing::info!(from, to = declared.version, "upgrading local schema");
    }
    install(conn, declared).map_err(|e| SchemaError::UpgradeFailed {
        from,
        to: declared.version,
        message: e.to_string(),
    })?;
    Ok(())
}

/// Create the declared indexes, drop schema-owned indexes no longer
/// declared, and stamp version + signature, all in one transaction.
fn install(conn: &mut Connection, declared: &SchemaVersion) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;

    let mut wanted = HashSet::new();
    for table in &declared.tables {
        for field in &table.indexes {
            let name = index_name(&table.name, field);
            tx.execute_batch(&format!(
                "CREATE INDEX IF NOT EXISTS \"{name}\" \
                 ON records (tbl, json_extract(data, '$.{field}'))"
            ))?;
            wanted.insert(name);
        }
    }

    let existing: Vec<String> = {
        let mut stmt = tx.prepare("SELECT name FROM sqlite_master WHERE type = 'index'")?;
        let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
        names.collect::<rusqlite::Result<_>>()?
    };
    for name in existing {
        if name.starts_with(INDEX_PREFIX) && !wanted.contains(&name) {
            tx.execute_batch(&format!("DROP INDEX IF EXISTS \"{name}\""))?;
        }
    }

    for (key, value) in [
        (SCHEMA_VERSION_KEY, declared.version.to_string()),
        (SCHEMA_SIGNATURE_KEY, declared.signature()),
    ] {
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
    }

    tx.commit()
}

// ============================================================================
// LocalStore
// ============================================================================

impl LocalStore for SqliteStore {
    fn get(&self, table: &str, id: &str) -> Result<Option<Value>, StorageError> {
        self.check_table(table)?;
        let data: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT data FROM records WHERE tbl = ?1 AND id = ?2",
                params![table, id],
                |row| row.get(0),
            )
            .optional()
        })?;
        data.map(|d| Self::parse_row(table, id, &d)).transpose()
    }

    fn get_all(&self, table: &str) -> Result<Vec<Value>, StorageError> {
        self.check_table(table)?;
        let raw: Vec<(String, String)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, data FROM records WHERE tbl = ?1 ORDER BY id")?;
            let rows = stmt.query_map([table], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })?;
        raw.iter()
            .map(|(id, data)| Self::parse_row(table, id, data))
            .collect()
    }

    fn count(&self, table: &str) -> Result<usize, StorageError> {
        self.check_table(table)?;
        let n: i64 = self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM records WHERE tbl = ?1",
                [table],
                |row| row.get(0),
            )
        })?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    fn bulk_upsert_tables(&self, batches: &[TableRows<'_>]) -> Result<usize, StorageError> {
        let mut validated = Vec::with_capacity(batches.len());
        for (table, rows) in batches {
            validated.push((*table, validate_batch(table, rows, |t| self.known.contains(t))?));
        }

        self.with_transaction(|tx| {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO records (tbl, id, data, updated_at) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut written = 0;
            for (table, rows) in &validated {
                for (id, row) in rows {
                    let data = serde_json::to_string(row).map_err(|source| {
                        StorageError::Serialization {
                            table: table.to_string(),
                            id: id.to_string(),
                            source,
                        }
                    })?;
                    let updated_at = row.get(UPDATED_AT_FIELD).and_then(Value::as_str);
                    stmt.execute(params![table, id, data, updated_at])?;
                    written += 1;
                }
            }
            Ok(written)
        })
    }

    fn delete(&self, table: &str, id: &str) -> Result<bool, StorageError> {
        self.check_table(table)?;
        let n = self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM records WHERE tbl = ?1 AND id = ?2",
                params![table, id],
            )
        })?;
        Ok(n > 0)
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_conn(|conn| read_meta(conn, key))
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map(|_| ())
        })
    }

    fn delete_meta(&self, key: &str) -> Result<bool, StorageError> {
        let n = self.with_conn(|conn| conn.execute("DELETE FROM meta WHERE key = ?1", [key]))?;
        Ok(n > 0)
    }

    fn meta_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key FROM meta WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
            )?;
            let keys = stmt.query_map([prefix], |row| row.get(0))?;
            keys.collect()
        })
    }
}
