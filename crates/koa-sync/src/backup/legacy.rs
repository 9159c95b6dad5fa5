//! One-shot import of the pre-sync export format.
//!
//! Legacy files are a JSON array of animals, each optionally carrying its own
//! `logs` array. Every animal gets a fresh id and every required field a
//! default, so even `[{"name": "Bruce"}]` produces a valid row. Writes go to
//! the Local Store only; nothing is pushed to the Remote Store.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    error::BackupError,
    schema::{ANIMALS, LOG_ENTRIES},
    storage::LocalStore,
    types::{format_timestamp, parse_timestamp},
};

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    pub animal_count: usize,
    pub log_count: usize,
    /// Entries (animals or logs) that were not JSON objects.
    pub skipped: usize,
}

#[derive(Debug, Serialize)]
struct Animal {
    id: String,
    name: String,
    species: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    latin_name: Option<String>,
    category: String,
    sex: String,
    dob: String,
    is_dob_unknown: bool,
    location: String,
    image_url: String,
    weight_unit: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ring_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    microchip_id: Option<String>,
    has_no_id: bool,
    acquisition_date: String,
    origin: &'static str,
    is_venomous: bool,
    hazard_rating: &'static str,
    red_list_status: &'static str,
    archived: bool,
    is_quarantine: bool,
    display_order: u32,
    is_group_animal: bool,
    created_at: String,
    updated_at: String,
    created_by: String,
    last_modified_by: String,
}

#[derive(Debug, Serialize)]
struct LogEntry {
    id: String,
    animal_id: String,
    log_date: String,
    log_type: String,
    value: String,
    notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    weight_grams: Option<f64>,
    created_at: String,
    updated_at: String,
    created_by: String,
    last_modified_by: String,
}

/// Convert legacy entries and write them in one batch (animals, then logs).
pub fn migrate_legacy_data(
    store: &dyn LocalStore,
    owner_id: &str,
    legacy: &[Value],
) -> Result<MigrationSummary, BackupError> {
    if owner_id.is_empty() {
        return Err(BackupError::NotAuthenticated);
    }

    let now = Utc::now();
    let mut animals = Vec::new();
    let mut logs = Vec::new();
    let mut skipped = 0;

    for entry in legacy {
        let Some(source) = entry.as_object() else {
            skipped += 1;
            continue;
        };
        let animal = convert_animal(source, owner_id, now);
        for log in source.get("logs").and_then(Value::as_array).into_iter().flatten() {
            match log.as_object() {
                Some(log) => logs.push(to_row(&convert_log(log, &animal.id, owner_id, now))?),
                None => skipped += 1,
            }
        }
        animals.push(to_row(&animal)?);
    }

    let summary = MigrationSummary {
        animal_count: animals.len(),
        log_count: logs.len(),
        skipped,
    };
    if !animals.is_empty() {
        store.bulk_upsert_tables(&[
            (ANIMALS, animals.as_slice()),
            (LOG_ENTRIES, logs.as_slice()),
        ])?;
    }
    tracing::info!(
        animals = summary.animal_count,
        logs = summary.log_count,
        skipped = summary.skipped,
        "legacy data migrated"
    );
    Ok(summary)
}

fn convert_animal(source: &Map<String, Value>, owner_id: &str, now: DateTime<Utc>) -> Animal {
    let stamp = format_timestamp(now);
    let hatched = text(source, "hatch_date").and_then(|s| parse_date(&s));
    Animal {
        id: Uuid::new_v4().to_string(),
        name: text(source, "name").unwrap_or_else(|| UNKNOWN.to_string()),
        species: text(source, "species").unwrap_or_else(|| UNKNOWN.to_string()),
        latin_name: text(source, "latin_name"),
        category: text(source, "category").unwrap_or_else(|| "uncategorized".to_string()),
        sex: text(source, "sex").unwrap_or_else(|| UNKNOWN.to_string()),
        dob: format_timestamp(hatched.unwrap_or(now)),
        is_dob_unknown: hatched.is_none(),
        location: text(source, "location").unwrap_or_else(|| UNKNOWN.to_string()),
        image_url: String::new(),
        weight_unit: "g",
        ring_number: text(source, "ring_number"),
        microchip_id: text(source, "microchip_id"),
        has_no_id: false,
        acquisition_date: stamp.clone(),
        origin: UNKNOWN,
        is_venomous: false,
        hazard_rating: "None",
        red_list_status: "NE",
        archived: false,
        is_quarantine: false,
        display_order: 0,
        is_group_animal: false,
        created_at: stamp.clone(),
        updated_at: stamp,
        created_by: owner_id.to_string(),
        last_modified_by: owner_id.to_string(),
    }
}

fn convert_log(
    source: &Map<String, Value>,
    animal_id: &str,
    owner_id: &str,
    now: DateTime<Utc>,
) -> LogEntry {
    let stamp = format_timestamp(now);
    let logged_at = match source.get("timestamp") {
        Some(Value::String(s)) => parse_date(s),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    };
    LogEntry {
        id: Uuid::new_v4().to_string(),
        animal_id: animal_id.to_string(),
        log_date: format_timestamp(logged_at.unwrap_or(now)),
        log_type: text(source, "type").unwrap_or_else(|| "GENERAL".to_string()),
        value: scalar_text(source.get("value")).unwrap_or_default(),
        notes: text(source, "notes").unwrap_or_default(),
        weight_grams: source.get("weight").and_then(Value::as_f64),
        created_at: stamp.clone(),
        updated_at: stamp,
        created_by: owner_id.to_string(),
        last_modified_by: owner_id.to_string(),
    }
}

/// Non-empty string field.
fn text(source: &Map<String, Value>, key: &str) -> Option<String> {
    source
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Strings as-is, numbers and booleans rendered; everything else absent.
fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// RFC 3339 or a bare `YYYY-MM-DD` (taken as midnight UTC).
fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    parse_timestamp(s).or_else(|| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    })
}

fn to_row<T: Serialize>(record: &T) -> Result<Value, BackupError> {
    Ok(serde_json::to_value(record)?)
}
