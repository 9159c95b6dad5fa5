use thiserror::Error;

use crate::remote::RemoteError;

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid record for table \"{table}\": {reason}")]
    InvalidRecord { table: String, reason: String },

    #[error("Table \"{0}\" is not declared in the local schema.")]
    UnknownTable(String),

    #[error("Failed to (de)serialize {table}/{id}: {source}")]
    Serialization {
        table: String,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

// ---------------------------------------------------------------------------
// SchemaError
// ---------------------------------------------------------------------------

/// Local schema incompatibility. Every variant is recoverable by destroying
/// and recreating the local database.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Local database is at schema v{stored}, newer than this build (v{declared})")]
    VersionMismatch { stored: u32, declared: u32 },

    #[error("Local database schema v{version} does not match the declared tables")]
    SignatureMismatch { version: u32 },

    #[error("Schema upgrade from v{from} to v{to} failed: {message}")]
    UpgradeFailed { from: u32, to: u32, message: String },

    #[error("Local database is corrupt: {0}")]
    Corrupt(String),
}

impl SchemaError {
    /// Whether a destructive reset is the prescribed recovery.
    pub fn is_incompatible(&self) -> bool {
        matches!(
            self,
            Self::VersionMismatch { .. }
                | Self::SignatureMismatch { .. }
                | Self::UpgradeFailed { .. }
                | Self::Corrupt(_)
        )
    }
}

// ---------------------------------------------------------------------------
// SyncError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Not authenticated: no current user for mutation")]
    NotAuthenticated,

    #[error("Remote {operation} on \"{table}\" failed: {source}")]
    Remote {
        table: String,
        operation: &'static str,
        #[source]
        source: RemoteError,
    },

    #[error("Remote {operation} on \"{table}\" timed out after {timeout_ms}ms")]
    Timeout {
        table: String,
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Invalid record for \"{table}\": {reason}")]
    InvalidRecord { table: String, reason: String },

    #[error("Table \"{0}\" is not registered for sync")]
    UnknownTable(String),

    #[error(
        "Remote write to {table}/{id} succeeded but the local mirror write failed; \
         local copy is stale until the next pull"
    )]
    LocalMirror {
        table: String,
        id: String,
        #[source]
        source: Box<StorageError>,
    },

    #[error("Background local write failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SyncError {
    /// The remote error, if this failure came from the Remote Store.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// BackupError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Backup document is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid backup format: {0}")]
    Malformed(String),

    #[error("Legacy migration requires an owner id")]
    NotAuthenticated,

    #[error("Restore point \"{0}\" not found")]
    RestorePointNotFound(String),

    #[error("Backup I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ---------------------------------------------------------------------------
// KoaError: top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum KoaError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias: the default error type is `KoaError`.
pub type Result<T, E = KoaError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
