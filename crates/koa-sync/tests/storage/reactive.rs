//! ReactiveStore change notifications.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use koa_sync::reactive::{ChangeEvent, ReactiveStore};
use koa_sync::storage::LocalStore;

use crate::support;

fn recorder() -> (Arc<Mutex<Vec<ChangeEvent>>>, impl Fn(&ChangeEvent) + Send + Sync + 'static) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    (log, move |e: &ChangeEvent| sink.lock().push(e.clone()))
}

#[test]
fn upsert_notifies_table_subscribers_after_commit() {
    let store = Arc::new(ReactiveStore::new(support::memory_store()));
    let seen = Arc::new(Mutex::new(None));
    let _sub = {
        let reader = Arc::clone(&store);
        let seen = Arc::clone(&seen);
        store.subscribe("animals", move |_| {
            // listeners observe the committed state
            *seen.lock() = Some(reader.count("animals").unwrap());
        })
    };

    store
        .bulk_upsert("animals", &[json!({ "id": "a1" }), json!({ "id": "a2" })])
        .unwrap();
    assert_eq!(*seen.lock(), Some(2));
}

#[test]
fn table_subscription_ignores_other_tables() {
    let store = ReactiveStore::new(support::memory_store());
    let (log, listener) = recorder();
    let _sub = store.subscribe("tasks", listener);

    store.bulk_upsert("animals", &[json!({ "id": "a1" })]).unwrap();
    assert!(log.lock().is_empty());

    store.bulk_upsert("tasks", &[json!({ "id": "t1" })]).unwrap();
    assert_eq!(
        *log.lock(),
        vec![ChangeEvent::Upsert {
            table: "tasks".to_string(),
            ids: vec!["t1".to_string()]
        }]
    );
}

#[test]
fn failed_and_empty_writes_are_silent() {
    let store = ReactiveStore::new(support::memory_store());
    let (log, listener) = recorder();
    let _sub = store.on_change(listener);

    assert!(store.bulk_upsert("animals", &[json!({ "name": "no id" })]).is_err());
    assert_eq!(store.bulk_upsert("animals", &[]).unwrap(), 0);
    assert!(!store.delete("animals", "missing").unwrap());
    assert!(log.lock().is_empty());
}

#[test]
fn delete_and_multi_table_writes_emit_per_table() {
    let store = ReactiveStore::new(support::memory_store());
    let (log, listener) = recorder();
    let _sub = store.on_change(listener);

    let animals = vec![json!({ "id": "a1" })];
    let logs = vec![json!({ "id": "l1" }), json!({ "id": "l2" })];
    store
        .bulk_upsert_tables(&[("animals", animals.as_slice()), ("log_entries", logs.as_slice())])
        .unwrap();
    assert!(store.delete("animals", "a1").unwrap());

    let events = log.lock().clone();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].table(), "animals");
    assert_eq!(events[1].ids(), vec!["l1", "l2"]);
    assert_eq!(
        events[2],
        ChangeEvent::Delete {
            table: "animals".to_string(),
            id: "a1".to_string()
        }
    );
}

#[test]
fn dropping_subscription_stops_delivery() {
    let store = ReactiveStore::new(support::memory_store());
    let (log, listener) = recorder();
    let sub = store.on_change(listener);

    store.bulk_upsert("animals", &[json!({ "id": "a1" })]).unwrap();
    drop(sub);
    store.bulk_upsert("animals", &[json!({ "id": "a2" })]).unwrap();

    assert_eq!(log.lock().len(), 1);
}
