//! Full-store export and atomic import of Backup Documents.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::BackupError,
    schema::Schema,
    storage::{LocalStore, TableRows},
    types::{format_timestamp, record_id},
};

/// Format version written by this build. Older documents are imported
/// best-effort.
pub const BACKUP_FORMAT_VERSION: &str = "1.2.0";

/// Serialized snapshot of every table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupDocument {
    pub version: String,
    #[serde(rename = "exportedAt")]
    pub exported_at: String,
    /// Rows keyed by local table name.
    pub data: BTreeMap<String, Vec<Value>>,
}

impl BackupDocument {
    pub fn row_count(&self) -> usize {
        self.data.values().map(Vec::len).sum()
    }
}

/// What an import wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Version string found in the document, if any.
    pub version: Option<String>,
    /// Rows written per local table.
    pub tables: BTreeMap<String, usize>,
    /// Keys under `data` that matched no table.
    pub ignored_keys: Vec<String>,
}

impl ImportSummary {
    pub fn rows(&self) -> usize {
        self.tables.values().sum()
    }
}

/// Restore points kept when none is configured.
pub const DEFAULT_MAX_RESTORE_POINTS: usize = 5;

pub struct BackupEngine {
    pub(super) store: Arc<dyn LocalStore>,
    schema: Arc<Schema>,
    pub(super) max_restore_points: usize,
}

impl BackupEngine {
    pub fn new(store: Arc<dyn LocalStore>, schema: Arc<Schema>) -> Self {
        Self {
            store,
            schema,
            max_restore_points: DEFAULT_MAX_RESTORE_POINTS,
        }
    }

    /// Keep at most `max` restore points (at least one).
    pub fn with_max_restore_points(mut self, max: usize) -> Self {
        self.max_restore_points = max.max(1);
        self
    }

    /// Read every table (concurrently, off the async threads) into one
    /// document. Does not modify the store.
    pub async fn export_snapshot(&self) -> Result<BackupDocument, BackupError> {
        let reads = self.schema.tables().iter().map(|table| {
            let store = Arc::clone(&self.store);
            let name = table.name.clone();
            async move {
                let rows = tokio::task::spawn_blocking({
                    let name = name.clone();
                    move || store.get_all(&name)
                })
                .await??;
                Ok::<_, BackupError>((name, rows))
            }
        });
        let data: BTreeMap<String, Vec<Value>> = try_join_all(reads).await?.into_iter().collect();

        let doc = BackupDocument {
            version: BACKUP_FORMAT_VERSION.to_string(),
            exported_at: format_timestamp(Utc::now()),
            data,
        };
        tracing::info!(
            tables = doc.data.len(),
            rows = doc.row_count(),
            "exported snapshot"
        );
        Ok(doc)
    }

    pub async fn export_json(&self) -> Result<String, BackupError> {
        let doc = self.export_snapshot().await?;
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// Write `KOA_Backup_<YYYY-MM-DD>.json` into `dir` and return its path.
    /// A file from earlier the same day is overwritten.
    pub async fn write_backup_file(&self, dir: impl AsRef<Path>) -> Result<PathBuf, BackupError> {
        let json = self.export_json().await?;
        let path = dir.as_ref().join(backup_file_name(Utc::now().date_naive()));
        tokio::task::spawn_blocking({
            let path = path.clone();
            move || std::fs::write(path, json)
        })
        .await??;
        tracing::info!(path = %path.display(), "backup file written");
        Ok(path)
    }

    /// Restore a Backup Document into the store.
    ///
    /// The whole document is validated first; nothing is written unless every
    /// known table's entry is an array of objects with a string `id`. The
    /// write itself is one all-or-nothing batch. Rows are merged by id, so
    /// rows not mentioned in the document are kept. Parsing and the write run
    /// on the blocking pool.
    pub async fn import_snapshot(&self, json: &str) -> Result<ImportSummary, BackupError> {
        let store = Arc::clone(&self.store);
        let schema = Arc::clone(&self.schema);
        let json = json.to_owned();
        tokio::task::spawn_blocking(move || import_document(&*store, &schema, &json))
            .await?
    }
}

fn import_document(
    store: &dyn LocalStore,
    schema: &Schema,
    json: &str,
) -> Result<ImportSummary, BackupError> {
    let root: Value = serde_json::from_str(json)?;
    let Value::Object(mut root) = root else {
        return Err(BackupError::Malformed("document must be a JSON object".to_string()));
    };

    let version = root.get("version").and_then(Value::as_str).map(str::to_string);
    match version.as_deref() {
        Some(BACKUP_FORMAT_VERSION) => {}
        Some(other) => tracing::warn!(
            found = other,
            expected = BACKUP_FORMAT_VERSION,
            "importing backup from a different format version"
        ),
        None => tracing::warn!("backup document has no version; importing best-effort"),
    }

    let data = match root.remove("data") {
        Some(Value::Object(data)) => data,
        _ => return Err(BackupError::Malformed("missing \"data\" object".to_string())),
    };

    let mut staged: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    let mut ignored_keys = Vec::new();
    for (key, entry) in data {
        let Some(table) = schema.resolve_backup_key(&key) else {
            tracing::warn!(key = %key, "ignoring unknown backup key");
            ignored_keys.push(key);
            continue;
        };
        let Value::Array(rows) = entry else {
            return Err(BackupError::Malformed(format!("\"{key}\" is not an array")));
        };
        if let Some(pos) = rows.iter().position(|r| !r.is_object() || record_id(r).is_none()) {
            return Err(BackupError::Malformed(format!(
                "\"{key}\"[{pos}] is not an object with a string \"id\""
            )));
        }
        if rows.is_empty() {
            continue;
        }
        staged.entry(table.name.clone()).or_default().extend(rows);
    }

    let batches: Vec<TableRows<'_>> = staged
        .iter()
        .map(|(table, rows)| (table.as_str(), rows.as_slice()))
        .collect();
    let written = store.bulk_upsert_tables(&batches)?;

    let summary = ImportSummary {
        version,
        tables: staged.iter().map(|(t, rows)| (t.clone(), rows.len())).collect(),
        ignored_keys,
    };
    tracing::info!(
        tables = summary.tables.len(),
        rows = written,
        ignored = summary.ignored_keys.len(),
        "imported snapshot"
    );
    Ok(summary)
}

pub(crate) fn backup_file_name(day: chrono::NaiveDate) -> String {
    format!("KOA_Backup_{}.json", day.format("%Y-%m-%d"))
}
