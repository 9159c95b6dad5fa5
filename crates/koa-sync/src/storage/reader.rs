//! Read-only handle on a Local Store.
//!
//! Handed to presentation code so it can render tables and re-read them on
//! change events. Writes only happen through the sync and backup engines.

use std::sync::Arc;

use serde_json::Value;

use crate::error::StorageError;

use super::traits::LocalStore;

#[derive(Clone)]
pub struct StoreReader {
    store: Arc<dyn LocalStore>,
}

impl StoreReader {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, table: &str, id: &str) -> Result<Option<Value>, StorageError> {
        self.store.get(table, id)
    }

    /// All rows of a table, ordered by id.
    pub fn get_all(&self, table: &str) -> Result<Vec<Value>, StorageError> {
        self.store.get_all(table)
    }

    pub fn count(&self, table: &str) -> Result<usize, StorageError> {
        self.store.count(table)
    }
}

impl std::fmt::Debug for StoreReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreReader").finish_non_exhaustive()
    }
}
