//! Local Store contract.
//!
//! `LocalStore` is the only write path into the client-side mirror: the
//! Record Sync Engine and the Backup/Restore Engine hold an
//! `Arc<dyn LocalStore>` and nothing else mutates rows. All methods are
//! synchronous; implementations keep each call a short critical section so
//! async callers can use them directly.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{Result, StorageError};
use crate::types::record_id;

/// Rows destined for one table inside a multi-table write.
pub type TableRows<'a> = (&'a str, &'a [Value]);

pub trait LocalStore: Send + Sync {
    /// Fetch a single row by id.
    fn get(&self, table: &str, id: &str) -> Result<Option<Value>, StorageError>;

    /// All rows of a table, ordered by id.
    fn get_all(&self, table: &str) -> Result<Vec<Value>, StorageError>;

    /// Number of rows in a table.
    fn count(&self, table: &str) -> Result<usize, StorageError>;

    /// Insert-or-replace every row by id. Rows absent from `rows` are untouched.
    /// Returns the number of rows written.
    fn bulk_upsert(&self, table: &str, rows: &[Value]) -> Result<usize, StorageError> {
        self.bulk_upsert_tables(&[(table, rows)])
    }

    /// Upsert into several tables as one all-or-nothing write.
    ///
    /// Every row is validated before anything is written; on error no table
    /// is modified.
    fn bulk_upsert_tables(&self, batches: &[TableRows<'_>]) -> Result<usize, StorageError>;

    /// Remove a row by id. Returns whether a row was removed.
    fn delete(&self, table: &str, id: &str) -> Result<bool, StorageError>;

    /// Read a metadata value (checkpoints, restore points, schema tags).
    fn get_meta(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a metadata value.
    fn set_meta(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a metadata value. Returns whether the key existed.
    fn delete_meta(&self, key: &str) -> Result<bool, StorageError>;

    /// Metadata keys starting with `prefix`, sorted.
    fn meta_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

impl<T: LocalStore + ?Sized> LocalStore for Arc<T> {
    fn get(&self, table: &str, id: &str) -> Result<Option<Value>, StorageError> {
        (**self).get(table, id)
    }

    fn get_all(&self, table: &str) -> Result<Vec<Value>, StorageError> {
        (**self).get_all(table)
    }

    fn count(&self, table: &str) -> Result<usize, StorageError> {
        (**self).count(table)
    }

    fn bulk_upsert(&self, table: &str, rows: &[Value]) -> Result<usize, StorageError> {
        (**self).bulk_upsert(table, rows)
    }

    fn bulk_upsert_tables(&self, batches: &[TableRows<'_>]) -> Result<usize, StorageError> {
        (**self).bulk_upsert_tables(batches)
    }

    fn delete(&self, table: &str, id: &str) -> Result<bool, StorageError> {
        (**self).delete(table, id)
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get_meta(key)
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set_meta(key, value)
    }

    fn delete_meta(&self, key: &str) -> Result<bool, StorageError> {
        (**self).delete_meta(key)
    }

    fn meta_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        (**self).meta_keys(prefix)
    }
}

/// Check a batch before writing it: known table, object rows, string ids.
pub(crate) fn validate_batch<'a>(
    table: &str,
    rows: &'a [Value],
    is_known: impl Fn(&str) -> bool,
) -> Result<Vec<(&'a str, &'a Value)>, StorageError> {
    if !is_known(table) {
        return Err(StorageError::UnknownTable(table.to_string()));
    }
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            if !row.is_object() {
                return Err(StorageError::InvalidRecord {
                    table: table.to_string(),
                    reason: format!("row {i} is not an object"),
                });
            }
            record_id(row)
                .map(|id| (id, row))
                .ok_or_else(|| StorageError::InvalidRecord {
                    table: table.to_string(),
                    reason: format!("row {i} has no string \"id\""),
                })
        })
        .collect()
}
