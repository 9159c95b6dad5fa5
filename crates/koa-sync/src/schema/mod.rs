//! Local schema declarations with a versioned builder.
//!
//! A [`Schema`] is an ordered chain of [`SchemaVersion`]s. Each version names
//! the tables it (re)declares; tables not mentioned are carried forward from
//! the previous version unchanged. The current version decides which tables
//! exist locally, which fields are indexed, and which tables the sync and
//! backup engines iterate over.

mod koa;

use std::collections::BTreeMap;
use std::sync::Arc;

pub use koa::{koa_schema, ANIMALS, LOG_ENTRIES};

use crate::types::ID_FIELD;

// ============================================================================
// TableDef
// ============================================================================

/// One local table and how it maps onto the Remote Store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    /// Local table name (also the key used in Backup Documents).
    pub name: String,
    /// Remote table name. Usually identical to `name`.
    pub remote_name: String,
    /// Indexed fields besides the primary key, in declaration order.
    pub indexes: Vec<String>,
    /// Extra keys accepted for this table when importing Backup Documents.
    pub backup_aliases: Vec<String>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            remote_name: name.clone(),
            name,
            indexes: Vec::new(),
            backup_aliases: Vec::new(),
        }
    }

    /// Map this table to a differently named remote table.
    pub fn remote(mut self, remote_name: impl Into<String>) -> Self {
        self.remote_name = remote_name.into();
        self
    }

    /// Declare indexed fields. `id` is always the primary key and is ignored here.
    pub fn indexes(mut self, fields: &[&str]) -> Self {
        for field in fields {
            if *field != ID_FIELD && !self.indexes.iter().any(|f| f == field) {
                self.indexes.push((*field).to_string());
            }
        }
        self
    }

    pub fn alias(mut self, key: impl Into<String>) -> Self {
        self.backup_aliases.push(key.into());
        self
    }

    /// Deterministic rendering used to detect declaration drift on disk.
    pub fn signature(&self) -> String {
        let mut fields = vec![ID_FIELD.to_string()];
        fields.extend(self.indexes.iter().cloned());
        format!("{}({}):{}", self.name, self.remote_name, fields.join(","))
    }
}

// ============================================================================
// Schema
// ============================================================================

/// A single version in the chain with its full (carried-forward) table set.
#[derive(Debug, Clone)]
pub struct SchemaVersion {
    pub version: u32,
    pub tables: Vec<Arc<TableDef>>,
}

impl SchemaVersion {
    pub fn signature(&self) -> String {
        let parts: Vec<String> = self.tables.iter().map(|t| t.signature()).collect();
        format!("v{};{}", self.version, parts.join(";"))
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    versions: Vec<SchemaVersion>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder {
            versions: Vec::new(),
        }
    }

    pub fn versions(&self) -> &[SchemaVersion] {
        &self.versions
    }

    pub fn current(&self) -> &SchemaVersion {
        // build() rejects empty chains
        &self.versions[self.versions.len() - 1]
    }

    pub fn current_version(&self) -> u32 {
        self.current().version
    }

    pub fn version(&self, version: u32) -> Option<&SchemaVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    /// Tables of the current version.
    pub fn tables(&self) -> &[Arc<TableDef>] {
        &self.current().tables
    }

    pub fn table(&self, name: &str) -> Option<&Arc<TableDef>> {
        self.tables().iter().find(|t| t.name == name)
    }

    /// Resolve a Backup Document key: the table name itself or one of its aliases.
    pub fn resolve_backup_key(&self, key: &str) -> Option<&Arc<TableDef>> {
        self.tables()
            .iter()
            .find(|t| t.name == key || t.backup_aliases.iter().any(|a| a == key))
    }
}

// ============================================================================
// Builder
// ============================================================================

pub struct SchemaBuilder {
    versions: Vec<SchemaVersion>,
}

impl SchemaBuilder {
    /// Declare the next version. Versions start at 1 and increase by exactly one.
    /// Panics on a gap, a repeat, or a duplicate table within one version.
    pub fn version(mut self, version: u32, tables: Vec<TableDef>) -> Self {
        let expected = self.versions.last().map_or(1, |v| v.version + 1);
        assert_eq!(
            version, expected,
            "Schema versions must be sequential: expected v{expected}, got v{version}"
        );

        let mut merged: BTreeMap<String, Arc<TableDef>> = BTreeMap::new();
        let mut order: Vec<String> = Vec::new();
        if let Some(prev) = self.versions.last() {
            for t in &prev.tables {
                order.push(t.name.clone());
                merged.insert(t.name.clone(), Arc::clone(t));
            }
        }

        let mut seen = Vec::new();
        for table in tables {
            assert!(
                !seen.contains(&table.name),
                "Table \"{}\" declared twice in v{version}",
                table.name
            );
            seen.push(table.name.clone());
            if !merged.contains_key(&table.name) {
                order.push(table.name.clone());
            }
            merged.insert(table.name.clone(), Arc::new(table));
        }

        let tables = order
            .into_iter()
            .filter_map(|name| merged.remove(&name))
            .collect();
        self.versions.push(SchemaVersion { version, tables });
        self
    }

    /// Panics if no version was declared.
    pub fn build(self) -> Schema {
        assert!(!self.versions.is_empty(), "Schema needs at least one version");
        Schema {
            versions: self.versions,
        }
    }
}
