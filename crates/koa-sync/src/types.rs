//! Shared record types: the Syncable Entity shape and the timestamp format
//! every layer agrees on.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Primary key field carried by every syncable row.
pub const ID_FIELD: &str = "id";
pub const CREATED_AT_FIELD: &str = "created_at";
pub const UPDATED_AT_FIELD: &str = "updated_at";
pub const CREATED_BY_FIELD: &str = "created_by";
pub const LAST_MODIFIED_BY_FIELD: &str = "last_modified_by";

/// Render an instant the way rows and filters store it: RFC 3339, UTC,
/// millisecond precision, `Z` suffix.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a timestamp previously produced by [`format_timestamp`] (or any
/// RFC 3339 string).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Current instant as a row timestamp.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// The `id` of a row, if it is an object with a non-empty string id.
pub fn record_id(row: &Value) -> Option<&str> {
    row.get(ID_FIELD)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// Outcome of a single-table pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// Rows were fetched and upserted locally (count may be zero).
    Applied { rows: usize },
    /// The Remote Store denied read access to this table for the current
    /// identity. Local data was left as-is.
    Skipped { reason: String },
}

impl PullOutcome {
    pub fn rows(&self) -> usize {
        match self {
            Self::Applied { rows } => *rows,
            Self::Skipped { .. } => 0,
        }
    }
}
