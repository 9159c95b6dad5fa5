//! MemoryStore: an in-process `LocalStore` held entirely in maps.
//!
//! Used for tests and for sessions that should not touch disk. Table set is
//! fixed from the `Schema` at construction; writes to undeclared tables are
//! rejected the same way the SQLite store rejects them.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{Result, StorageError};
use crate::schema::Schema;

use super::traits::{validate_batch, LocalStore, TableRows};

/// table name → (id → row)
type Tables = HashMap<String, BTreeMap<String, Value>>;

pub struct MemoryStore {
    tables: RwLock<Tables>,
    meta: RwLock<BTreeMap<String, String>>,
    known: HashSet<String>,
}

impl MemoryStore {
    pub fn new(schema: &Schema) -> Self {
        let known: HashSet<String> = schema.tables().iter().map(|t| t.name.clone()).collect();
        let tables = known
            .iter()
            .map(|name| (name.clone(), BTreeMap::new()))
            .collect();
        Self {
            tables: RwLock::new(tables),
            meta: RwLock::new(BTreeMap::new()),
            known,
        }
    }

    fn check_table(&self, table: &str) -> Result<(), StorageError> {
        if self.known.contains(table) {
            Ok(())
        } else {
            Err(StorageError::UnknownTable(table.to_string()))
        }
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, table: &str, id: &str) -> Result<Option<Value>, StorageError> {
        self.check_table(table)?;
        Ok(self
            .tables
            .read()
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned())
    }

    fn get_all(&self, table: &str) -> Result<Vec<Value>, StorageError> {
        self.check_table(table)?;
        Ok(self
            .tables
            .read()
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn count(&self, table: &str) -> Result<usize, StorageError> {
        self.check_table(table)?;
        Ok(self.tables.read().get(table).map_or(0, BTreeMap::len))
    }

    fn bulk_upsert_tables(&self, batches: &[TableRows<'_>]) -> Result<usize, StorageError> {
        // Validate everything before taking the write lock.
        let mut validated = Vec::with_capacity(batches.len());
        for (table, rows) in batches {
            validated.push((*table, validate_batch(table, rows, |t| self.known.contains(t))?));
        }

        let mut tables = self.tables.write();
        let mut written = 0;
        for (table, rows) in validated {
            let target = tables.entry(table.to_string()).or_default();
            for (id, row) in rows {
                target.insert(id.to_string(), row.clone());
                written += 1;
            }
        }
        Ok(written)
    }

    fn delete(&self, table: &str, id: &str) -> Result<bool, StorageError> {
        self.check_table(table)?;
        Ok(self
            .tables
            .write()
            .get_mut(table)
            .map_or(false, |rows| rows.remove(id).is_some()))
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.meta.read().get(key).cloned())
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.meta.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_meta(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.meta.write().remove(key).is_some())
    }

    fn meta_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .meta
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
