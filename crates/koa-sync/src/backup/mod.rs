//! Backup, restore and legacy migration.

pub mod legacy;
mod restore;
mod snapshot;

use serde_json::Value;

use crate::error::BackupError;

pub use legacy::MigrationSummary;
pub use restore::RestorePoint;
pub use snapshot::{
    BackupDocument, BackupEngine, ImportSummary, BACKUP_FORMAT_VERSION, DEFAULT_MAX_RESTORE_POINTS,
};

impl BackupEngine {
    /// Import a legacy export into this engine's store, owned by `owner_id`.
    pub fn migrate_legacy_data(
        &self,
        owner_id: &str,
        legacy: &[Value],
    ) -> Result<MigrationSummary, BackupError> {
        legacy::migrate_legacy_data(self.store.as_ref(), owner_id, legacy)
    }
}
