//! Restore points kept inside the Local Store.

use serde_json::json;

use koa_sync::backup::BackupEngine;
use koa_sync::error::BackupError;
use koa_sync::storage::LocalStore;

use crate::support;

#[tokio::test]
async fn restore_point_brings_back_earlier_rows() {
    let store = support::memory_store();
    let engine = BackupEngine::new(store.clone(), support::schema());
    store
        .bulk_upsert("animals", &[json!({ "id": "a1", "name": "Bruce" })])
        .unwrap();

    let point = engine.create_restore_point().await.unwrap();
    assert!(point.id.starts_with("snap_"));
    assert!(point.size_bytes > 0);

    store
        .bulk_upsert("animals", &[json!({ "id": "a1", "name": "overwritten" })])
        .unwrap();
    let summary = engine.restore_from_point(&point.id).await.unwrap();

    assert_eq!(summary.tables.get("animals"), Some(&1));
    assert_eq!(store.get("animals", "a1").unwrap().unwrap()["name"], "Bruce");
}

#[tokio::test]
async fn points_are_listed_newest_first_with_distinct_ids() {
    let store = support::memory_store();
    let engine = BackupEngine::new(store.clone(), support::schema());
    assert!(engine.list_restore_points().unwrap().is_empty());

    let first = engine.create_restore_point().await.unwrap();
    store.bulk_upsert("tasks", &[json!({ "id": "t1" })]).unwrap();
    let second = engine.create_restore_point().await.unwrap();

    assert_ne!(first.id, second.id);
    let listed = engine.list_restore_points().unwrap();
    assert_eq!(listed, vec![second.clone(), first.clone()]);
    assert!(second.size_bytes > first.size_bytes);
}

#[tokio::test]
async fn unknown_point_is_not_found() {
    let store = support::memory_store();
    let engine = BackupEngine::new(store, support::schema());
    let err = engine.restore_from_point("snap_0").await.unwrap_err();
    assert!(matches!(err, BackupError::RestorePointNotFound(id) if id == "snap_0"));
}

#[tokio::test]
async fn restore_points_are_not_part_of_exports() {
    let store = support::memory_store();
    let engine = BackupEngine::new(store, support::schema());
    engine.create_restore_point().await.unwrap();

    let doc = engine.export_snapshot().await.unwrap();
    assert_eq!(doc.row_count(), 0);
}

#[tokio::test]
async fn oldest_points_are_pruned_past_the_limit() {
    let store = support::memory_store();
    let engine = BackupEngine::new(store.clone(), support::schema()).with_max_restore_points(2);

    let first = engine.create_restore_point().await.unwrap();
    let second = engine.create_restore_point().await.unwrap();
    let third = engine.create_restore_point().await.unwrap();

    let listed = engine.list_restore_points().unwrap();
    assert_eq!(listed, vec![third, second]);
    assert_eq!(store.meta_keys("restore_data:").unwrap().len(), 2);
    assert!(store
        .get_meta(&format!("restore_data:{}", first.id))
        .unwrap()
        .is_none());
    let err = engine.restore_from_point(&first.id).await.unwrap_err();
    assert!(matches!(err, BackupError::RestorePointNotFound(_)));
}

#[tokio::test]
async fn deleting_a_point_removes_its_document() {
    let store = support::memory_store();
    let engine = BackupEngine::new(store.clone(), support::schema());
    let point = engine.create_restore_point().await.unwrap();

    assert!(engine.delete_restore_point(&point.id).unwrap());
    assert!(!engine.delete_restore_point(&point.id).unwrap());

    assert!(engine.list_restore_points().unwrap().is_empty());
    assert!(store.meta_keys("restore_").unwrap().is_empty());
}
