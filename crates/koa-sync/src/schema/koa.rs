//! The application's local tables.

use super::{Schema, TableDef};

pub const ANIMALS: &str = "animals";
pub const LOG_ENTRIES: &str = "log_entries";

const V1_TABLES: &[(&str, &[&str])] = &[
    ("users", &["role", "active"]),
    (ANIMALS, &["category", "species", "location", "archived"]),
    (LOG_ENTRIES, &["animal_id", "log_date", "log_type", "created_by"]),
    ("documents", &["category", "upload_date"]),
    ("tasks", &["animal_id", "due_date", "completed", "assigned_to_user_id"]),
    ("site_log_entries", &["log_date", "status", "priority"]),
    ("incidents", &["incident_date", "status", "severity", "animal_id"]),
    ("first_aid_log_entries", &["log_date", "incident_type"]),
    ("organisation_profile", &[]),
    ("audit_log_entries", &["affected_entity_id", "action_type", "created_at"]),
    ("daily_round_entries", &["round_date", "animal_id"]),
    ("bcs_data", &["animal_id", "date"]),
    ("animal_movements", &["animal_id", "movement_date", "movement_type"]),
    ("contacts", &[]),
    ("holiday_requests", &[]),
];

fn v1_table(name: &str, indexes: &[&str]) -> TableDef {
    let table = TableDef::new(name).indexes(indexes);
    match name {
        "documents" => table.remote("global_documents"),
        "organisation_profile" => table.remote("organisation_profiles").alias("orgProfile"),
        "site_log_entries" => table.alias("siteLogs"),
        "first_aid_log_entries" => table.alias("firstAidLogs"),
        LOG_ENTRIES => table.alias("logEntries"),
        _ => table,
    }
}

/// v1 mirrors the original store layout; v2 indexes `updated_at` everywhere
/// for incremental pulls.
pub fn koa_schema() -> Schema {
    let v1: Vec<TableDef> = V1_TABLES
        .iter()
        .map(|(name, indexes)| v1_table(name, indexes))
        .collect();
    let v2: Vec<TableDef> = v1
        .iter()
        .cloned()
        .map(|t| t.indexes(&["updated_at"]))
        .collect();

    Schema::builder().version(1, v1).version(2, v2).build()
}
