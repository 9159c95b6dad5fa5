//! RecordSyncEngine: pull and remote-first mutations.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;

use koa_sync::auth::Session;
use koa_sync::config::SyncConfig;
use koa_sync::error::{StorageError, SyncError};
use koa_sync::remote::{RemoteError, RemoteErrorKind};
use koa_sync::schema::{Schema, TableDef};
use koa_sync::storage::{LocalStore, MemoryStore};
use koa_sync::types::{parse_timestamp, PullOutcome};

use crate::support::{self, MockRemote, USER};

fn setup() -> (Arc<MockRemote>, Arc<MemoryStore>, Arc<koa_sync::sync::RecordSyncEngine>) {
    let remote = MockRemote::new();
    let store = support::memory_store();
    let engine = support::engine(
        &remote,
        store.clone(),
        support::signed_in(),
        &SyncConfig::default(),
    );
    (remote, store, engine)
}

// ============================================================================
// Pull
// ============================================================================

#[tokio::test]
async fn pull_is_idempotent() {
    let (remote, store, engine) = setup();
    remote.seed(
        "animals",
        vec![
            support::row("a1", "2024-01-01T00:00:00.000Z"),
            support::row("a2", "2024-01-02T00:00:00.000Z"),
        ],
    );
    let animals = support::table("animals");

    let first = engine.pull_table(&animals, None).await.unwrap();
    let after_first = store.get_all("animals").unwrap();
    let second = engine.pull_table(&animals, None).await.unwrap();

    assert_eq!(first, PullOutcome::Applied { rows: 2 });
    assert_eq!(second, first);
    assert_eq!(store.get_all("animals").unwrap(), after_first);
    assert_eq!(after_first, remote.rows("animals"));
}

#[tokio::test]
async fn pull_upserts_without_removing_local_rows() {
    let (remote, store, engine) = setup();
    store
        .bulk_upsert(
            "animals",
            &[
                json!({ "id": "local-only", "name": "Pip" }),
                json!({ "id": "a1", "name": "stale" }),
            ],
        )
        .unwrap();
    remote.seed("animals", vec![json!({ "id": "a1", "name": "fresh" })]);

    engine
        .pull_table(&support::table("animals"), None)
        .await
        .unwrap();

    assert_eq!(store.count("animals").unwrap(), 2);
    assert_eq!(store.get("animals", "a1").unwrap().unwrap()["name"], "fresh");
    assert!(store.get("animals", "local-only").unwrap().is_some());
}

#[tokio::test]
async fn pull_reads_the_remote_table_name() {
    let (remote, store, engine) = setup();
    remote.seed("global_documents", vec![json!({ "id": "d1" })]);

    engine
        .pull_table(&support::table("documents"), None)
        .await
        .unwrap();

    assert_eq!(store.count("documents").unwrap(), 1);
    assert_eq!(remote.calls()[0].table, "global_documents");
}

#[tokio::test]
async fn pull_with_since_filters_rows() {
    let (remote, store, engine) = setup();
    remote.seed(
        "tasks",
        vec![
            support::row("old", "2024-01-01T00:00:00.000Z"),
            support::row("new", "2024-06-01T00:00:00.000Z"),
        ],
    );
    let since = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

    let outcome = engine
        .pull_table(&support::table("tasks"), Some(since))
        .await
        .unwrap();

    assert_eq!(outcome, PullOutcome::Applied { rows: 1 });
    assert!(store.get("tasks", "new").unwrap().is_some());
    assert!(store.get("tasks", "old").unwrap().is_none());
    assert_eq!(remote.calls()[0].since, Some(since));
}

#[tokio::test]
async fn pull_pages_past_the_server_row_cap() {
    let remote = MockRemote::new();
    let store = support::memory_store();
    let config = SyncConfig {
        pull_page_size: 100,
        ..SyncConfig::default()
    };
    let engine = support::engine(&remote, store.clone(), support::signed_in(), &config);
    remote.cap_rows(100);
    let rows: Vec<_> = (0..250)
        .map(|i| support::row(&format!("a{i:04}"), "2024-01-01T00:00:00.000Z"))
        .collect();
    remote.seed("animals", rows);

    let outcome = engine
        .pull_table(&support::table("animals"), None)
        .await
        .unwrap();

    assert_eq!(outcome, PullOutcome::Applied { rows: 250 });
    assert_eq!(store.count("animals").unwrap(), 250);
    assert_eq!(store.get_all("animals").unwrap(), remote.rows("animals"));
    let offsets: Vec<usize> = remote.calls().iter().map(|c| c.offset).collect();
    assert_eq!(offsets, vec![0, 100, 200]);
}

#[tokio::test]
async fn pull_of_exact_multiple_asks_for_one_empty_page() {
    let remote = MockRemote::new();
    let store = support::memory_store();
    let config = SyncConfig {
        pull_page_size: 2,
        ..SyncConfig::default()
    };
    let engine = support::engine(&remote, store.clone(), support::signed_in(), &config);
    remote.seed(
        "tasks",
        (0..4)
            .map(|i| support::row(&format!("t{i}"), "2024-01-01T00:00:00.000Z"))
            .collect(),
    );

    let outcome = engine
        .pull_table(&support::table("tasks"), None)
        .await
        .unwrap();

    assert_eq!(outcome, PullOutcome::Applied { rows: 4 });
    assert_eq!(remote.calls().len(), 3);
}

#[tokio::test]
async fn invalid_row_on_a_later_page_writes_nothing() {
    let remote = MockRemote::new();
    let store = support::memory_store();
    let config = SyncConfig {
        pull_page_size: 1,
        ..SyncConfig::default()
    };
    let engine = support::engine(&remote, store.clone(), support::signed_in(), &config);
    remote.seed(
        "tasks",
        vec![json!({ "id": "t1" }), json!({ "name": "no id" })],
    );

    let err = engine
        .pull_table(&support::table("tasks"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::InvalidRecord { .. }));
    assert_eq!(store.count("tasks").unwrap(), 0);
}

#[tokio::test]
async fn pull_of_denied_table_is_skipped_and_keeps_local_rows() {
    let (remote, store, engine) = setup();
    store
        .bulk_upsert("incidents", &[json!({ "id": "i1" })])
        .unwrap();
    remote.seed("incidents", vec![json!({ "id": "i2" })]);
    remote.fail(
        "incidents",
        RemoteError::unauthorized("permission denied for table incidents").with_code("42501"),
    );

    let outcome = engine
        .pull_table(&support::table("incidents"), None)
        .await
        .unwrap();

    match outcome {
        PullOutcome::Skipped { reason } => assert!(reason.contains("42501")),
        other => panic!("expected skip, got {other:?}"),
    }
    assert_eq!(store.get_all("incidents").unwrap(), vec![json!({ "id": "i1" })]);
}

#[tokio::test]
async fn pull_surfaces_other_remote_errors() {
    let (remote, store, engine) = setup();
    remote.fail("tasks", RemoteError::new("connection reset"));

    let err = engine
        .pull_table(&support::table("tasks"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Remote { operation: "select", .. }));
    assert_eq!(err.remote().map(|e| e.kind), Some(RemoteErrorKind::Transient));
    assert_eq!(store.count("tasks").unwrap(), 0);
}

#[tokio::test]
async fn pull_rejects_rows_without_id_before_writing() {
    let (remote, store, engine) = setup();
    remote.seed(
        "animals",
        vec![json!({ "id": "a1" }), json!({ "name": "anonymous" })],
    );

    let err = engine
        .pull_table(&support::table("animals"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::InvalidRecord { ref table, .. } if table == "animals"));
    assert_eq!(store.count("animals").unwrap(), 0);
}

#[tokio::test]
async fn pull_needs_no_identity() {
    let remote = MockRemote::new();
    let store = support::memory_store();
    let engine = support::engine(
        &remote,
        store.clone(),
        Arc::new(Session::new()),
        &SyncConfig::default(),
    );
    remote.seed("contacts", vec![json!({ "id": "c1" })]);

    let outcome = engine
        .pull_table(&support::table("contacts"), None)
        .await
        .unwrap();
    assert_eq!(outcome.rows(), 1);
}

// ============================================================================
// Create
// ============================================================================

#[tokio::test]
async fn create_stamps_provenance_and_mirrors_server_row() {
    let (remote, store, engine) = setup();

    let saved = engine
        .create_record(
            &support::table("animals"),
            json!({ "id": "a1", "name": "Bruce", "updated_at": "1999-01-01T00:00:00.000Z" }),
        )
        .await
        .unwrap();

    assert_eq!(saved["created_by"], USER);
    assert_eq!(saved["last_modified_by"], USER);
    assert_ne!(saved["updated_at"], "1999-01-01T00:00:00.000Z");
    assert!(parse_timestamp(saved["updated_at"].as_str().unwrap()).is_some());
    assert!(saved["created_at"].is_string());
    // server default made it into the local copy
    assert_eq!(saved["server_version"], 1);
    assert_eq!(store.get("animals", "a1").unwrap(), Some(saved.clone()));
    assert_eq!(remote.row("animals", "a1"), Some(saved));
}

#[tokio::test]
async fn create_keeps_caller_created_at_and_uses_server_id() {
    let (_remote, store, engine) = setup();

    let saved = engine
        .create_record(
            &support::table("tasks"),
            json!({ "title": "Clean aviary", "created_at": "2024-01-01T08:00:00.000Z" }),
        )
        .await
        .unwrap();

    assert_eq!(saved["created_at"], "2024-01-01T08:00:00.000Z");
    let id = saved["id"].as_str().unwrap();
    assert!(id.starts_with("srv-"));
    assert!(store.get("tasks", id).unwrap().is_some());
}

#[tokio::test]
async fn create_failure_leaves_local_untouched() {
    let (remote, store, engine) = setup();
    remote.fail(
        "animals",
        RemoteError::with_kind("duplicate key", RemoteErrorKind::Rejected).with_code("23505"),
    );

    let err = engine
        .create_record(&support::table("animals"), json!({ "id": "a1" }))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Remote { operation: "insert", .. }));
    assert_eq!(store.count("animals").unwrap(), 0);
}

#[tokio::test]
async fn mutations_require_identity_before_any_io() {
    let remote = MockRemote::new();
    let store = support::memory_store();
    let session = Arc::new(Session::new());
    let engine = support::engine(&remote, store.clone(), session.clone(), &SyncConfig::default());
    let animals = support::table("animals");

    let create = engine.create_record(&animals, json!({ "id": "a1" })).await;
    let update = engine.update_record(&animals, "a1", json!({ "name": "x" })).await;
    let delete = engine.delete_record(&animals, "a1").await;

    assert!(matches!(create, Err(SyncError::NotAuthenticated)));
    assert!(matches!(update, Err(SyncError::NotAuthenticated)));
    assert!(matches!(delete, Err(SyncError::NotAuthenticated)));
    assert!(remote.calls().is_empty());
    assert_eq!(store.count("animals").unwrap(), 0);

    session.sign_in("keeper-2");
    let saved = engine.create_record(&animals, json!({ "id": "a1" })).await.unwrap();
    assert_eq!(saved["created_by"], "keeper-2");
}

#[tokio::test]
async fn non_object_record_is_rejected() {
    let (remote, _store, engine) = setup();
    let err = engine
        .create_record(&support::table("animals"), json!(["not", "a", "row"]))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidRecord { .. }));
    assert!(remote.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn create_timeout_leaves_local_untouched() {
    let remote = MockRemote::new();
    let store = support::memory_store();
    let config = SyncConfig {
        remote_timeout_ms: 500,
        ..SyncConfig::default()
    };
    let engine = support::engine(&remote, store.clone(), support::signed_in(), &config);
    remote.delay("animals", Duration::from_secs(5));

    let err = engine
        .create_record(&support::table("animals"), json!({ "id": "a1" }))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::Timeout {
            operation: "insert",
            timeout_ms: 500,
            ..
        }
    ));
    assert_eq!(store.count("animals").unwrap(), 0);
    assert!(remote.rows("animals").is_empty());
}

#[tokio::test]
async fn local_failure_after_remote_success_is_reported() {
    let remote = MockRemote::new();
    let animals_only = Schema::builder()
        .version(1, vec![TableDef::new("animals")])
        .build();
    let store = Arc::new(MemoryStore::new(&animals_only));
    let engine = support::engine(&remote, store, support::signed_in(), &SyncConfig::default());

    let err = engine
        .create_record(&support::table("tasks"), json!({ "id": "t1" }))
        .await
        .unwrap_err();

    match err {
        SyncError::LocalMirror { table, id, source } => {
            assert_eq!(table, "tasks");
            assert_eq!(id, "t1");
            assert!(matches!(*source, StorageError::UnknownTable(_)));
        }
        other => panic!("expected LocalMirror, got {other:?}"),
    }
    // the remote write stands
    assert!(remote.row("tasks", "t1").is_some());
}

// ============================================================================
// Update
// ============================================================================

#[tokio::test]
async fn sequential_updates_leave_local_equal_to_last_server_row() {
    let (remote, store, engine) = setup();
    let animals = support::table("animals");
    engine
        .create_record(&animals, json!({ "id": "a1", "name": "Bruce", "location": "Aviary 1" }))
        .await
        .unwrap();

    engine
        .update_record(&animals, "a1", json!({ "name": "Bruce II" }))
        .await
        .unwrap();
    let last = engine
        .update_record(&animals, "a1", json!({ "name": "Bruce III" }))
        .await
        .unwrap();

    let local = store.get("animals", "a1").unwrap().unwrap();
    assert_eq!(local, last);
    assert_eq!(Some(local.clone()), remote.row("animals", "a1"));
    assert_eq!(local["name"], "Bruce III");
    assert_eq!(local["location"], "Aviary 1");
    assert_eq!(local["server_version"], 3);
}

#[tokio::test]
async fn update_ignores_caller_id_and_stamps_modifier() {
    let (remote, store, engine) = setup();
    remote.seed(
        "animals",
        vec![json!({ "id": "a1", "name": "Bruce", "last_modified_by": "someone-else" })],
    );

    let saved = engine
        .update_record(
            &support::table("animals"),
            "a1",
            json!({ "id": "hijack", "name": "Ruby", "updated_at": "1999-01-01T00:00:00.000Z" }),
        )
        .await
        .unwrap();

    assert_eq!(saved["id"], "a1");
    assert_eq!(saved["last_modified_by"], USER);
    assert_ne!(saved["updated_at"], "1999-01-01T00:00:00.000Z");
    assert!(store.get("animals", "hijack").unwrap().is_none());
    assert!(remote.row("animals", "hijack").is_none());
}

#[tokio::test]
async fn update_of_missing_row_is_not_found() {
    let (_remote, store, engine) = setup();
    let err = engine
        .update_record(&support::table("animals"), "ghost", json!({ "name": "x" }))
        .await
        .unwrap_err();
    assert_eq!(err.remote().map(|e| e.kind), Some(RemoteErrorKind::NotFound));
    assert_eq!(store.count("animals").unwrap(), 0);
}

#[tokio::test]
async fn empty_id_is_rejected() {
    let (remote, _store, engine) = setup();
    let animals = support::table("animals");
    assert!(matches!(
        engine.update_record(&animals, "", json!({})).await,
        Err(SyncError::InvalidRecord { .. })
    ));
    assert!(matches!(
        engine.delete_record(&animals, "").await,
        Err(SyncError::InvalidRecord { .. })
    ));
    assert!(remote.calls().is_empty());
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn delete_removes_remote_then_local() {
    let (remote, store, engine) = setup();
    let animals = support::table("animals");
    engine
        .create_record(&animals, json!({ "id": "a1" }))
        .await
        .unwrap();

    engine.delete_record(&animals, "a1").await.unwrap();

    assert!(store.get("animals", "a1").unwrap().is_none());
    assert!(remote.row("animals", "a1").is_none());
    let ops: Vec<&str> = remote.calls().iter().map(|c| c.op).collect();
    assert_eq!(ops, vec!["insert", "delete"]);
}

#[tokio::test]
async fn delete_failure_keeps_local_row() {
    let (remote, store, engine) = setup();
    store.bulk_upsert("animals", &[json!({ "id": "a1" })]).unwrap();
    remote.fail("animals", RemoteError::new("offline"));

    let err = engine
        .delete_record(&support::table("animals"), "a1")
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Remote { operation: "delete", .. }));
    assert!(store.get("animals", "a1").unwrap().is_some());
}

#[tokio::test]
async fn delete_of_uncached_row_succeeds() {
    let (remote, _store, engine) = setup();
    remote.seed("animals", vec![json!({ "id": "a9" })]);
    engine
        .delete_record(&support::table("animals"), "a9")
        .await
        .unwrap();
    assert!(remote.rows("animals").is_empty());
}
