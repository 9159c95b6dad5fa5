//! RecordSyncEngine: per-table pull and remote-first dual-write mutations.
//!
//! Every mutation runs strictly remote → local. The Remote Store's answer is
//! the row that gets mirrored, so server-side defaults and normalization
//! land in the Local Store too. There is no transaction spanning the two
//! steps: if the local write fails after the remote one succeeded, the call
//! returns [`SyncError::LocalMirror`] and the local copy stays stale until
//! the next pull.
//!
//! Updates are last-writer-wins. No version or ETag is sent, so a concurrent
//! update from another client between our read and our write is overwritten
//! by whichever request the Remote Store applies last.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::{
    auth::IdentityProvider,
    config::SyncConfig,
    error::SyncError,
    remote::{RemoteError, RemoteStore, SelectFilter},
    schema::TableDef,
    storage::LocalStore,
    types::{
        now_timestamp, record_id, PullOutcome, CREATED_AT_FIELD, CREATED_BY_FIELD, ID_FIELD,
        LAST_MODIFIED_BY_FIELD, UPDATED_AT_FIELD,
    },
};

pub struct RecordSyncEngine {
    remote: Arc<dyn RemoteStore>,
    local: Arc<dyn LocalStore>,
    identity: Arc<dyn IdentityProvider>,
    remote_timeout: Duration,
    page_size: usize,
}

impl RecordSyncEngine {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalStore>,
        identity: Arc<dyn IdentityProvider>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            remote,
            local,
            identity,
            remote_timeout: config.remote_timeout(),
            page_size: config.pull_page_size.max(1),
        }
    }

    /// The Local Store this engine mirrors into.
    pub(crate) fn local(&self) -> &Arc<dyn LocalStore> {
        &self.local
    }

    // -----------------------------------------------------------------------
    // Pull
    // -----------------------------------------------------------------------

    /// Fetch rows changed at or after `since` (all rows when `None`) and
    /// upsert them locally. Rows missing from the result are left alone.
    ///
    /// The Remote Store is read in pages of `pull_page_size` rows ordered by
    /// id until a short page comes back. Nothing is written until every page
    /// has arrived and validated; the write runs on the blocking pool.
    ///
    /// An access-denied answer is not an error: the table is skipped and the
    /// local copy kept. Idempotent for a fixed remote state.
    pub async fn pull_table(
        &self,
        table: &TableDef,
        since: Option<DateTime<Utc>>,
    ) -> Result<PullOutcome, SyncError> {
        let filter = since.map_or_else(SelectFilter::all, SelectFilter::updated_since);

        let rows = match self.select_all(table, &filter).await {
            Ok(rows) => rows,
            Err(SyncError::Remote { source, .. }) if source.is_unauthorized() => {
                tracing::warn!(
                    table = %table.name,
                    error = %source,
                    "read access denied; skipping table"
                );
                return Ok(PullOutcome::Skipped {
                    reason: source.to_string(),
                });
            }
            Err(e) => {
                tracing::error!(table = %table.name, error = %e, "pull failed");
                return Err(e);
            }
        };

        if let Some(pos) = rows.iter().position(|r| record_id(r).is_none()) {
            return Err(SyncError::InvalidRecord {
                table: table.name.clone(),
                reason: format!("remote row {pos} has no string \"id\""),
            });
        }

        if rows.is_empty() {
            tracing::debug!(table = %table.name, "pull returned no rows");
            return Ok(PullOutcome::Applied { rows: 0 });
        }

        let local = Arc::clone(&self.local);
        let name = table.name.clone();
        let written =
            tokio::task::spawn_blocking(move || local.bulk_upsert(&name, &rows)).await??;
        tracing::info!(table = %table.name, rows = written, "pulled rows into local store");
        Ok(PullOutcome::Applied { rows: written })
    }

    /// Every row matching `filter`, one page at a time.
    async fn select_all(
        &self,
        table: &TableDef,
        filter: &SelectFilter,
    ) -> Result<Vec<Value>, SyncError> {
        let mut rows: Vec<Value> = Vec::new();
        loop {
            let page_filter = filter.clone().page(rows.len(), self.page_size);
            let page = self
                .call(
                    table,
                    "select",
                    self.remote.select(&table.remote_name, &page_filter),
                )
                .await?;
            let fetched = page.len();
            rows.extend(page);
            if fetched < self.page_size {
                return Ok(rows);
            }
            tracing::debug!(table = %table.name, fetched = rows.len(), "fetching next page");
        }
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Insert remotely, then mirror the server's row locally and return it.
    pub async fn create_record(&self, table: &TableDef, record: Value) -> Result<Value, SyncError> {
        let user = self.require_user()?;
        let mut row = into_object(table, record)?;

        let now = now_timestamp();
        row.insert(UPDATED_AT_FIELD.to_string(), Value::String(now.clone()));
        if !has_value(&row, CREATED_AT_FIELD) {
            row.insert(CREATED_AT_FIELD.to_string(), Value::String(now));
        }
        if !has_value(&row, CREATED_BY_FIELD) {
            row.insert(CREATED_BY_FIELD.to_string(), Value::String(user.clone()));
        }
        row.insert(LAST_MODIFIED_BY_FIELD.to_string(), Value::String(user));

        let saved = self
            .call(
                table,
                "insert",
                self.remote.insert(&table.remote_name, &Value::Object(row)),
            )
            .await?;
        self.mirror(table, saved)
    }

    /// Patch remotely by id, then mirror the server's row locally and return it.
    ///
    /// `id` and `updated_at` keys in `partial` are ignored.
    pub async fn update_record(
        &self,
        table: &TableDef,
        id: &str,
        partial: Value,
    ) -> Result<Value, SyncError> {
        let user = self.require_user()?;
        require_id(table, id)?;
        let mut patch = into_object(table, partial)?;

        patch.remove(ID_FIELD);
        patch.insert(UPDATED_AT_FIELD.to_string(), Value::String(now_timestamp()));
        patch.insert(LAST_MODIFIED_BY_FIELD.to_string(), Value::String(user));

        let saved = self
            .call(
                table,
                "update",
                self.remote
                    .update(&table.remote_name, id, &Value::Object(patch)),
            )
            .await?;
        self.mirror(table, saved)
    }

    /// Delete remotely by id, then locally. A remote failure leaves the local
    /// row in place.
    pub async fn delete_record(&self, table: &TableDef, id: &str) -> Result<(), SyncError> {
        self.require_user()?;
        require_id(table, id)?;

        self.call(table, "delete", self.remote.delete(&table.remote_name, id))
            .await?;

        match self.local.delete(&table.name, id) {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::debug!(table = %table.name, id, "deleted row was not cached locally");
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    table = %table.name,
                    id,
                    error = %e,
                    "remote delete succeeded but local delete failed"
                );
                Err(SyncError::LocalMirror {
                    table: table.name.clone(),
                    id: id.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn require_user(&self) -> Result<String, SyncError> {
        self.identity
            .current_user_id()
            .filter(|id| !id.is_empty())
            .ok_or(SyncError::NotAuthenticated)
    }

    /// Await a Remote Store call under the engine's timeout.
    async fn call<T>(
        &self,
        table: &TableDef,
        operation: &'static str,
        fut: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, SyncError> {
        match tokio::time::timeout(self.remote_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(SyncError::Remote {
                table: table.name.clone(),
                operation,
                source,
            }),
            Err(_) => Err(SyncError::Timeout {
                table: table.name.clone(),
                operation,
                timeout_ms: u64::try_from(self.remote_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Write the server's row into the Local Store.
    fn mirror(&self, table: &TableDef, saved: Value) -> Result<Value, SyncError> {
        let id = match record_id(&saved) {
            Some(id) => id.to_string(),
            None => {
                return Err(SyncError::InvalidRecord {
                    table: table.name.clone(),
                    reason: "server returned a row without a string \"id\"".to_string(),
                })
            }
        };

        if let Err(e) = self.local.bulk_upsert(&table.name, std::slice::from_ref(&saved)) {
            tracing::error!(
                table = %table.name,
                id = %id,
                error = %e,
                "remote write succeeded but local mirror failed"
            );
            return Err(SyncError::LocalMirror {
                table: table.name.clone(),
                id,
                source: Box::new(e),
            });
        }
        Ok(saved)
    }
}

fn into_object(table: &TableDef, value: Value) -> Result<Map<String, Value>, SyncError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(SyncError::InvalidRecord {
            table: table.name.clone(),
            reason: "record must be a JSON object".to_string(),
        }),
    }
}

fn require_id(table: &TableDef, id: &str) -> Result<(), SyncError> {
    if id.is_empty() {
        return Err(SyncError::InvalidRecord {
            table: table.name.clone(),
            reason: "id must not be empty".to_string(),
        });
    }
    Ok(())
}

fn has_value(row: &Map<String, Value>, field: &str) -> bool {
    row.get(field).is_some_and(|v| !v.is_null())
}
