//! BulkSyncOrchestrator: fan-out isolation, per-table timeouts, checkpoints.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use koa_sync::config::SyncConfig;
use koa_sync::error::SyncError;
use koa_sync::remote::RemoteError;
use koa_sync::storage::{LocalStore, MemoryStore};
use koa_sync::sync::{checkpoint_key, BulkSyncOrchestrator};
use koa_sync::types::{parse_timestamp, PullOutcome};

use crate::support::{self, MockRemote};

fn orchestrator(config: SyncConfig) -> (Arc<MockRemote>, Arc<MemoryStore>, BulkSyncOrchestrator) {
    let remote = MockRemote::new();
    let store = support::memory_store();
    let engine = support::engine(&remote, store.clone(), support::signed_in(), &config);
    let orchestrator =
        BulkSyncOrchestrator::new(engine, support::schema().tables().to_vec(), &config);
    (remote, store, orchestrator)
}

fn incremental() -> SyncConfig {
    SyncConfig {
        incremental_pull: true,
        ..SyncConfig::default()
    }
}

/// Seed one row into the remote side of every registered table.
fn seed_everything(remote: &MockRemote, orchestrator: &BulkSyncOrchestrator) {
    for table in orchestrator.tables() {
        remote.seed(
            &table.remote_name,
            vec![json!({ "id": format!("{}-1", table.name) })],
        );
    }
}

// ============================================================================
// Fan-out
// ============================================================================

#[tokio::test]
async fn failing_table_does_not_affect_the_others() {
    let (remote, store, orchestrator) = orchestrator(SyncConfig::default());
    seed_everything(&remote, &orchestrator);
    remote.fail("incidents", RemoteError::new("gateway timeout"));

    let report = orchestrator.sync_all_tables().await;

    assert_eq!(report.results.len(), orchestrator.tables().len());
    assert!(!report.is_success());
    let failed: Vec<&str> = report.failures().map(|(t, _)| t).collect();
    assert_eq!(failed, vec!["incidents"]);
    assert!(matches!(
        report.outcome("incidents"),
        Some(Err(SyncError::Remote { .. }))
    ));
    assert_eq!(report.rows_pulled(), orchestrator.tables().len() - 1);

    for table in orchestrator.tables() {
        let expected = usize::from(table.name != "incidents");
        assert_eq!(store.count(&table.name).unwrap(), expected, "{}", table.name);
    }
}

#[tokio::test]
async fn denied_tables_are_reported_as_skipped() {
    let (remote, store, orchestrator) = orchestrator(SyncConfig::default());
    seed_everything(&remote, &orchestrator);
    remote.fail(
        "users",
        RemoteError::unauthorized("permission denied").with_code("42501"),
    );

    let report = orchestrator.sync_all_tables().await;

    assert!(report.is_success());
    assert_eq!(report.skipped().collect::<Vec<_>>(), vec!["users"]);
    assert_eq!(store.count("users").unwrap(), 0);
    assert_eq!(store.count("animals").unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_table_times_out_alone() {
    let config = SyncConfig {
        remote_timeout_ms: 60_000,
        table_timeout_ms: 1_000,
        ..SyncConfig::default()
    };
    let (remote, store, orchestrator) = orchestrator(config);
    seed_everything(&remote, &orchestrator);
    remote.delay("tasks", Duration::from_secs(10));

    let report = orchestrator.sync_all_tables().await;

    assert!(matches!(
        report.outcome("tasks"),
        Some(Err(SyncError::Timeout {
            operation: "pull",
            timeout_ms: 1_000,
            ..
        }))
    ));
    assert_eq!(report.failures().count(), 1);
    assert_eq!(store.count("tasks").unwrap(), 0);
    assert_eq!(store.count("animals").unwrap(), 1);
}

#[tokio::test]
async fn overlapping_runs_are_harmless() {
    let (remote, store, orchestrator) = orchestrator(SyncConfig::default());
    seed_everything(&remote, &orchestrator);

    let (a, b) = tokio::join!(orchestrator.sync_all_tables(), orchestrator.sync_all_tables());

    assert!(a.is_success() && b.is_success());
    assert_eq!(store.count("animals").unwrap(), 1);
}

#[tokio::test]
async fn sync_table_by_name() {
    let (remote, store, orchestrator) = orchestrator(SyncConfig::default());
    remote.seed("organisation_profiles", vec![json!({ "id": "org" })]);

    let outcome = orchestrator.sync_table("organisation_profile").await.unwrap();
    assert_eq!(outcome, PullOutcome::Applied { rows: 1 });
    assert!(store.get("organisation_profile", "org").unwrap().is_some());

    let err = orchestrator.sync_table("weather").await.unwrap_err();
    assert!(matches!(err, SyncError::UnknownTable(name) if name == "weather"));
}

// ============================================================================
// Checkpoints
// ============================================================================

#[tokio::test]
async fn full_pull_mode_keeps_no_checkpoints() {
    let (remote, store, orchestrator) = orchestrator(SyncConfig::default());
    remote.seed("animals", vec![support::row("a1", "2024-01-01T00:00:00.000Z")]);

    orchestrator.sync_table("animals").await.unwrap();
    orchestrator.sync_table("animals").await.unwrap();

    assert_eq!(store.get_meta(&checkpoint_key("animals")).unwrap(), None);
    assert!(remote.calls_for("animals").iter().all(|c| c.since.is_none()));
}

#[tokio::test]
async fn successful_pull_advances_checkpoint_and_next_pull_uses_it() {
    let (remote, store, orchestrator) = orchestrator(incremental());
    remote.seed("animals", vec![support::row("a1", "2024-01-01T00:00:00.000Z")]);

    assert_eq!(orchestrator.checkpoint("animals").unwrap(), None);
    orchestrator.sync_table("animals").await.unwrap();

    let checkpoint = orchestrator.checkpoint("animals").unwrap().expect("checkpoint");
    let raw = store.get_meta(&checkpoint_key("animals")).unwrap().unwrap();
    assert_eq!(parse_timestamp(&raw), Some(checkpoint));

    // the old row is not re-fetched
    let outcome = orchestrator.sync_table("animals").await.unwrap();
    assert_eq!(outcome, PullOutcome::Applied { rows: 0 });
    let calls = remote.calls_for("animals");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].since, None);
    assert_eq!(calls[1].since, Some(checkpoint));
}

#[tokio::test]
async fn failed_or_skipped_pull_leaves_checkpoint_alone() {
    let (remote, store, orchestrator) = orchestrator(incremental());
    store
        .set_meta(&checkpoint_key("tasks"), "2024-01-01T00:00:00.000Z")
        .unwrap();
    remote.fail("tasks", RemoteError::new("offline"));
    remote.fail("users", RemoteError::unauthorized("denied"));

    let report = orchestrator.sync_all_tables().await;

    assert!(report.outcome("tasks").unwrap().is_err());
    assert_eq!(
        store.get_meta(&checkpoint_key("tasks")).unwrap().as_deref(),
        Some("2024-01-01T00:00:00.000Z")
    );
    assert_eq!(store.get_meta(&checkpoint_key("users")).unwrap(), None);
    assert!(store.get_meta(&checkpoint_key("animals")).unwrap().is_some());
}

#[tokio::test]
async fn unparsable_checkpoint_falls_back_to_full_pull() {
    let (remote, store, orchestrator) = orchestrator(incremental());
    store.set_meta(&checkpoint_key("animals"), "yesterday").unwrap();
    remote.seed("animals", vec![support::row("a1", "2024-01-01T00:00:00.000Z")]);

    let outcome = orchestrator.sync_table("animals").await.unwrap();

    assert_eq!(outcome.rows(), 1);
    assert_eq!(remote.calls_for("animals")[0].since, None);
}
