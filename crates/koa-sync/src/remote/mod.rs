//! Remote Store contract: table-scoped CRUD against the authoritative backend.

#[cfg(feature = "postgrest")]
pub mod postgrest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

#[cfg(feature = "postgrest")]
pub use postgrest::PostgrestClient;

// ============================================================================
// RemoteStore: user-provided network layer
// ============================================================================

/// The authoritative store. Rows are Syncable Entities (JSON objects with an
/// `id`). Implementations must report access-denied failures as
/// [`RemoteErrorKind::Unauthorized`] so pulls can skip those tables.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Rows matching `filter`.
    async fn select(&self, table: &str, filter: &SelectFilter) -> Result<Vec<Value>, RemoteError>;

    /// Insert a row and return the server's representation of it.
    async fn insert(&self, table: &str, row: &Value) -> Result<Value, RemoteError>;

    /// Patch the row with `id` and return the server's representation.
    async fn update(&self, table: &str, id: &str, patch: &Value) -> Result<Value, RemoteError>;

    /// Delete the row with `id`.
    async fn delete(&self, table: &str, id: &str) -> Result<(), RemoteError>;
}

/// Row filter for [`RemoteStore::select`].
///
/// With a `limit`, rows are ordered by `id` and the window
/// `offset..offset + limit` is returned. A server may return fewer rows than
/// asked for only when the window runs past the last row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectFilter {
    /// Only rows whose `updated_at` is at or after this instant.
    pub updated_since: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl SelectFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn updated_since(since: DateTime<Utc>) -> Self {
        Self {
            updated_since: Some(since),
            ..Self::default()
        }
    }

    /// Restrict to one page of `limit` rows starting at `offset`.
    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

// ============================================================================
// RemoteError
// ============================================================================

/// Classification of remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Access to this table is denied for the current identity.
    Unauthorized,
    /// Network failure, timeout, or server-side outage. Safe to retry.
    Transient,
    /// The addressed row does not exist.
    NotFound,
    /// The server refused the request (constraint, validation, bad input).
    Rejected,
}

/// Remote-level error: a message, a kind, and the backend's own error code
/// when it supplied one.
#[derive(Debug, Clone)]
pub struct RemoteError {
    pub message: String,
    pub kind: RemoteErrorKind,
    pub code: Option<String>,
}

impl RemoteError {
    /// A transient error (the default classification).
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(message, RemoteErrorKind::Transient)
    }

    pub fn with_kind(message: impl Into<String>, kind: RemoteErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
            code: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::with_kind(message, RemoteErrorKind::Unauthorized)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == RemoteErrorKind::Unauthorized
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (code {code})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RemoteError {}
