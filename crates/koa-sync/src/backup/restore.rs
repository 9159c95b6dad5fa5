//! In-store restore points.
//!
//! A restore point is a full Backup Document kept in the Local Store's
//! metadata area, so it survives restarts but not a schema reset. The
//! descriptor and the document live under separate keys; the document is
//! written first and deleted last so a listed point is always restorable.
//! Only the newest `max_restore_points` are kept.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::BackupError;
use crate::types::format_timestamp;

use super::snapshot::{BackupEngine, ImportSummary};

const POINT_PREFIX: &str = "restore_point:";
const DATA_PREFIX: &str = "restore_data:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorePoint {
    /// `snap_<unix millis>`.
    pub id: String,
    pub created_at: String,
    pub size_bytes: usize,
}

impl BackupEngine {
    /// Snapshot the store into a new restore point, then drop the oldest
    /// points beyond the retention limit.
    pub async fn create_restore_point(&self) -> Result<RestorePoint, BackupError> {
        let json = serde_json::to_string(&self.export_snapshot().await?)?;

        let mut millis = Utc::now().timestamp_millis();
        let id = loop {
            let id = format!("snap_{millis}");
            if self.store.get_meta(&format!("{POINT_PREFIX}{id}"))?.is_none() {
                break id;
            }
            millis += 1;
        };

        let point = RestorePoint {
            id,
            created_at: format_timestamp(Utc::now()),
            size_bytes: json.len(),
        };
        self.store.set_meta(&format!("{DATA_PREFIX}{}", point.id), &json)?;
        self.store.set_meta(
            &format!("{POINT_PREFIX}{}", point.id),
            &serde_json::to_string(&point)?,
        )?;
        tracing::info!(id = %point.id, bytes = point.size_bytes, "restore point created");

        for stale in self.list_restore_points()?.iter().skip(self.max_restore_points) {
            self.delete_restore_point(&stale.id)?;
        }
        Ok(point)
    }

    /// Every restore point, newest first. Unreadable descriptors are skipped.
    pub fn list_restore_points(&self) -> Result<Vec<RestorePoint>, BackupError> {
        let mut points = Vec::new();
        for key in self.store.meta_keys(POINT_PREFIX)? {
            let Some(raw) = self.store.get_meta(&key)? else {
                continue;
            };
            match serde_json::from_str::<RestorePoint>(&raw) {
                Ok(point) => points.push(point),
                Err(e) => tracing::warn!(key = %key, error = %e, "skipping unreadable restore point"),
            }
        }
        points.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(points)
    }

    /// Remove a restore point and its document. Returns whether it existed.
    pub fn delete_restore_point(&self, id: &str) -> Result<bool, BackupError> {
        let listed = self.store.delete_meta(&format!("{POINT_PREFIX}{id}"))?;
        let stored = self.store.delete_meta(&format!("{DATA_PREFIX}{id}"))?;
        if listed || stored {
            tracing::info!(id, "restore point deleted");
        }
        Ok(listed || stored)
    }

    /// Import the document saved under `id`, with the same merge semantics
    /// as [`BackupEngine::import_snapshot`].
    pub async fn restore_from_point(&self, id: &str) -> Result<ImportSummary, BackupError> {
        let json = self
            .store
            .get_meta(&format!("{DATA_PREFIX}{id}"))?
            .ok_or_else(|| BackupError::RestorePointNotFound(id.to_string()))?;
        tracing::info!(id, "restoring from restore point");
        self.import_snapshot(&json).await
    }
}
