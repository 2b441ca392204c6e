//! Processed set and failure ledger persistence.

use std::fs;
use std::sync::Arc;

use agent_courier::persistence::StateStore;
use serde_json::Value;

#[test]
fn missing_file_starts_empty() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = StateStore::open(temp.path().join("nested/state.json")).expect("open");

    assert!(!store.is_processed("m1"));
    assert_eq!(store.failure_count("m1"), 0);
    assert!(temp.path().join("nested").is_dir());
}

#[test]
fn processed_ids_survive_reopen() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("state.json");

    {
        let store = StateStore::open(path.clone()).expect("open");
        store.mark_processed("m1").expect("mark");
    }

    let reopened = StateStore::open(path).expect("reopen");
    assert!(reopened.is_processed("m1"));
}

#[test]
fn file_uses_documented_shape() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("state.json");
    let store = StateStore::open(path.clone()).expect("open");

    store.mark_processed("a").unwrap();
    store.record_failure("b").unwrap();
    store.record_failure("b").unwrap();

    let raw: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(raw["processed"], serde_json::json!(["a"]));
    assert_eq!(raw["failed"]["b"], 2);
}

#[test]
fn success_clears_failure_counter() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = StateStore::open(temp.path().join("state.json")).expect("open");

    assert_eq!(store.record_failure("m1").unwrap(), 1);
    assert_eq!(store.record_failure("m1").unwrap(), 2);
    store.mark_processed("m1").unwrap();

    let ledger = store.snapshot().unwrap();
    assert!(ledger.processed.contains("m1"));
    assert!(!ledger.failed.contains_key("m1"));
}

#[test]
fn corrupt_file_is_kept_aside_and_ledger_starts_fresh() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("state.json");
    fs::write(&path, "{not json").unwrap();

    let store = StateStore::open(path.clone()).expect("open despite corruption");
    assert!(!store.is_processed("m1"));
    assert!(!path.exists());
    assert_eq!(
        fs::read_to_string(temp.path().join("state.json.corrupt")).unwrap(),
        "{not json"
    );

    store.mark_processed("m1").unwrap();
    let reopened = StateStore::open(path).expect("reopen");
    assert!(reopened.is_processed("m1"));
}

#[test]
fn concurrent_mutations_are_not_lost() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("state.json");
    let store = Arc::new(StateStore::open(path.clone()).expect("open"));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for j in 0..10 {
                    store.mark_processed(&format!("m{i}-{j}")).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let reopened = StateStore::open(path).expect("reopen");
    assert_eq!(reopened.snapshot().unwrap().processed.len(), 80);
}
