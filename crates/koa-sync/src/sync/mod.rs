//! Remote ⇄ local synchronization.

mod engine;
mod orchestrator;
mod types;

pub use engine::RecordSyncEngine;
pub use orchestrator::{checkpoint_key, BulkSyncOrchestrator};
pub use types::{SyncReport, TableSyncResult};
