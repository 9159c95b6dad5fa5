//! Result types for bulk sync runs.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::SyncError;
use crate::types::PullOutcome;

/// Outcome of one table inside a `sync_all_tables` run.
#[derive(Debug)]
pub struct TableSyncResult {
    pub table: String,
    pub outcome: Result<PullOutcome, SyncError>,
}

/// Aggregated result of a fan-out sync. Never an error as a whole: each
/// table's failure is captured here instead.
#[derive(Debug)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub results: Vec<TableSyncResult>,
}

impl SyncReport {
    /// True when no table failed (skipped tables are not failures).
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.outcome.is_ok())
    }

    pub fn outcome(&self, table: &str) -> Option<&Result<PullOutcome, SyncError>> {
        self.results
            .iter()
            .find(|r| r.table == table)
            .map(|r| &r.outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &SyncError)> {
        self.results.iter().filter_map(|r| match &r.outcome {
            Err(e) => Some((r.table.as_str(), e)),
            Ok(_) => None,
        })
    }

    /// Tables the Remote Store refused to let us read.
    pub fn skipped(&self) -> impl Iterator<Item = &str> {
        self.results.iter().filter_map(|r| match &r.outcome {
            Ok(PullOutcome::Skipped { .. }) => Some(r.table.as_str()),
            _ => None,
        })
    }

    pub fn rows_pulled(&self) -> usize {
        self.results
            .iter()
            .filter_map(|r| r.outcome.as_ref().ok())
            .map(PullOutcome::rows)
            .sum()
    }
}
