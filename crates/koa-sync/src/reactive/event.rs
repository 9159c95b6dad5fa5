//! ChangeEvent: a committed mutation of the Local Store.

/// Emitted by `ReactiveStore` after a write has been committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Rows were inserted or replaced in one table.
    Upsert { table: String, ids: Vec<String> },
    /// A single row was removed.
    Delete { table: String, id: String },
}

impl ChangeEvent {
    /// The table that was affected.
    pub fn table(&self) -> &str {
        match self {
            Self::Upsert { table, .. } => table,
            Self::Delete { table, .. } => table,
        }
    }

    /// IDs of the rows that were affected.
    pub fn ids(&self) -> Vec<&str> {
        match self {
            Self::Upsert { ids, .. } => ids.iter().map(|s| s.as_str()).collect(),
            Self::Delete { id, .. } => vec![id.as_str()],
        }
    }
}
