//! ReactiveStore<S>: a `LocalStore` that announces its writes.
//!
//! Reads pass straight through. Writes go to the inner store first; the
//! `ChangeEvent` is emitted only after the inner call returned `Ok`, so a
//! listener re-reading the table always observes the committed state.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{Result, StorageError};
use crate::storage::traits::{LocalStore, TableRows};
use crate::types::record_id;

use super::{event::ChangeEvent, event_bus::EventBus, event_bus::ListenerId};

/// Handle that removes its listener when dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    bus: Arc<EventBus>,
    id: ListenerId,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

pub struct ReactiveStore<S: LocalStore> {
    inner: S,
    bus: Arc<EventBus>,
}

impl<S: LocalStore> ReactiveStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            bus: Arc::new(EventBus::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Watch one table.
    pub fn subscribe(
        &self,
        table: &str,
        callback: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.bus.subscribe(Some(table), callback);
        Subscription {
            bus: Arc::clone(&self.bus),
            id,
        }
    }

    /// Watch every table.
    pub fn on_change(&self, callback: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Subscription {
        let id = self.bus.subscribe(None, callback);
        Subscription {
            bus: Arc::clone(&self.bus),
            id,
        }
    }
}

impl<S: LocalStore> LocalStore for ReactiveStore<S> {
    fn get(&self, table: &str, id: &str) -> Result<Option<Value>, StorageError> {
        self.inner.get(table, id)
    }

    fn get_all(&self, table: &str) -> Result<Vec<Value>, StorageError> {
        self.inner.get_all(table)
    }

    fn count(&self, table: &str) -> Result<usize, StorageError> {
        self.inner.count(table)
    }

    fn bulk_upsert_tables(&self, batches: &[TableRows<'_>]) -> Result<usize, StorageError> {
        let written = self.inner.bulk_upsert_tables(batches)?;
        for (table, rows) in batches {
            if rows.is_empty() {
                continue;
            }
            let ids = rows
                .iter()
                .filter_map(record_id)
                .map(str::to_string)
                .collect();
            self.bus.emit(&ChangeEvent::Upsert {
                table: table.to_string(),
                ids,
            });
        }
        Ok(written)
    }

    fn delete(&self, table: &str, id: &str) -> Result<bool, StorageError> {
        let removed = self.inner.delete(table, id)?;
        if removed {
            self.bus.emit(&ChangeEvent::Delete {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
        Ok(removed)
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get_meta(key)
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.set_meta(key, value)
    }

    fn delete_meta(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.delete_meta(key)
    }

    fn meta_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.meta_keys(prefix)
    }
}
