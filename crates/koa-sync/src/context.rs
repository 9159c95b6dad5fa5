//! SyncContext: the explicitly passed process context.
//!
//! Built once at startup and shared by `Arc`. It owns the Local Store
//! (wrapped so every write is announced), the Remote Store client, the
//! identity source and the engines built on top of them. Nothing in the
//! crate reaches for a global. Callers get a read-only view of the store;
//! every write goes through an engine.

use std::sync::Arc;

use crate::{
    auth::IdentityProvider,
    backup::BackupEngine,
    config::KoaConfig,
    reactive::{ChangeEvent, ReactiveStore, Subscription},
    remote::RemoteStore,
    schema::{Schema, TableDef},
    storage::{LocalStore, StoreReader},
    sync::{BulkSyncOrchestrator, RecordSyncEngine},
};

#[cfg(all(feature = "sqlite", feature = "postgrest"))]
use crate::{error::Result, remote::postgrest::PostgrestClient, storage::SqliteStore};

pub struct SyncContext {
    config: KoaConfig,
    schema: Arc<Schema>,
    store: Arc<ReactiveStore<Arc<dyn LocalStore>>>,
    reader: StoreReader,
    remote: Arc<dyn RemoteStore>,
    engine: Arc<RecordSyncEngine>,
    orchestrator: BulkSyncOrchestrator,
    backup: BackupEngine,
}

impl SyncContext {
    pub fn new(
        config: KoaConfig,
        schema: Arc<Schema>,
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let store = Arc::new(ReactiveStore::new(store));
        let local: Arc<dyn LocalStore> = store.clone();

        let engine = Arc::new(RecordSyncEngine::new(
            Arc::clone(&remote),
            Arc::clone(&local),
            identity,
            &config.sync,
        ));
        let orchestrator =
            BulkSyncOrchestrator::new(Arc::clone(&engine), schema.tables().to_vec(), &config.sync);
        let backup = BackupEngine::new(Arc::clone(&local), Arc::clone(&schema))
            .with_max_restore_points(config.store.max_restore_points);

        Self {
            config,
            schema,
            store,
            reader: StoreReader::new(local),
            remote,
            engine,
            orchestrator,
            backup,
        }
    }

    /// Open the on-disk store at `config.store.path` and point a PostgREST
    /// client at `config.remote`.
    ///
    /// With `reset_on_incompatible` an unusable database is destroyed and
    /// recreated; otherwise the schema error is returned.
    #[cfg(all(feature = "sqlite", feature = "postgrest"))]
    pub fn open(
        config: KoaConfig,
        schema: Arc<Schema>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<(Self, Arc<PostgrestClient>)> {
        let store = if config.store.reset_on_incompatible {
            SqliteStore::open_with_recovery(&config.store.path, &schema)?
        } else {
            SqliteStore::open(&config.store.path, &schema)?
        };
        let client = Arc::new(PostgrestClient::new(&config.remote).map_err(|e| {
            crate::error::KoaError::Config(format!("remote client: {e}"))
        })?);
        tracing::info!(
            path = %config.store.path.display(),
            schema_version = schema.current_version(),
            "sync context opened"
        );
        let remote: Arc<dyn RemoteStore> = client.clone();
        Ok((
            Self::new(config, schema, Arc::new(store), remote, identity),
            client,
        ))
    }

    pub fn config(&self) -> &KoaConfig {
        &self.config
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Registered table by local name.
    pub fn table(&self, name: &str) -> Option<&Arc<TableDef>> {
        self.schema.table(name)
    }

    /// Read access to the Local Store.
    pub fn store(&self) -> &StoreReader {
        &self.reader
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub fn engine(&self) -> &Arc<RecordSyncEngine> {
        &self.engine
    }

    pub fn orchestrator(&self) -> &BulkSyncOrchestrator {
        &self.orchestrator
    }

    pub fn backup(&self) -> &BackupEngine {
        &self.backup
    }

    /// Re-read `table` whenever `callback` fires to keep a live view current.
    pub fn subscribe(
        &self,
        table: &str,
        callback: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.store.subscribe(table, callback)
    }

    pub fn on_change(&self, callback: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Subscription {
        self.store.on_change(callback)
    }
}
