//! Runtime configuration.
//!
//! Everything has a default so an empty JSON object is a valid config. The
//! remote endpoint is usually supplied through the environment
//! (`SUPABASE_URL`, `SUPABASE_ANON_KEY`), which overrides file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KoaError, Result};

pub const ENV_REMOTE_URL: &str = "SUPABASE_URL";
pub const ENV_REMOTE_ANON_KEY: &str = "SUPABASE_ANON_KEY";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KoaConfig {
    pub remote: RemoteConfig,
    pub store: StoreConfig,
    pub sync: SyncConfig,
}

impl KoaConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| KoaError::Config(format!("invalid config: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| KoaError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Apply `SUPABASE_URL` / `SUPABASE_ANON_KEY` from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(ENV_REMOTE_URL).filter(|v| !v.is_empty()) {
            self.remote.url = url;
        }
        if let Some(key) = lookup(ENV_REMOTE_ANON_KEY).filter(|v| !v.is_empty()) {
            self.remote.anon_key = key;
        }
        self
    }
}

/// Remote Store endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Project URL, without the `/rest/v1` suffix.
    pub url: String,
    pub anon_key: String,
    /// HTTP-level timeout per request.
    pub request_timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            request_timeout_ms: 20_000,
        }
    }
}

/// Local Store location and open policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Destroy and recreate the database when its schema is incompatible.
    pub reset_on_incompatible: bool,
    /// Restore points kept in the store; creating one more drops the oldest.
    pub max_restore_points: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("koa.db"),
            reset_on_incompatible: true,
            max_restore_points: 5,
        }
    }
}

/// Sync engine and orchestrator tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound on any single Remote Store call made by the engine.
    pub remote_timeout_ms: u64,
    /// Upper bound on one table's pull inside `sync_all_tables`.
    pub table_timeout_ms: u64,
    /// Pull only rows changed since the table's stored checkpoint.
    pub incremental_pull: bool,
    /// Rows requested per select while pulling. Must not exceed the
    /// server's own row cap (PostgREST `max-rows`), since a short page ends
    /// the pull.
    pub pull_page_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_timeout_ms: 15_000,
            table_timeout_ms: 30_000,
            incremental_pull: false,
            pull_page_size: 1_000,
        }
    }
}

impl SyncConfig {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn table_timeout(&self) -> Duration {
        Duration::from_millis(self.table_timeout_ms)
    }
}
