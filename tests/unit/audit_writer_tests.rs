//! Unit tests for `JsonlAuditWriter`.
//!
//! | Scenario | Expectation |
//! |----------|-------------|
//! | missing directory | created by the constructor |
//! | one entry | one line of `{timestamp, event, details}` |
//! | reopen | new entries append, earlier lines untouched |
//! | concurrent writers | every line parses |

use std::fs;
use std::sync::Arc;

use agent_courier::audit::{AuditEntry, AuditEventType, AuditLogger, JsonlAuditWriter};
use serde_json::Value;

fn read_lines(path: &std::path::Path) -> Vec<Value> {
    fs::read_to_string(path)
        .expect("audit file")
        .lines()
        .map(|l| serde_json::from_str(l).expect("valid json line"))
        .collect()
}

#[test]
fn new_creates_directory_if_missing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("a/b/audit.jsonl");

    let writer = JsonlAuditWriter::new(path.clone()).expect("constructor");
    assert!(temp.path().join("a/b").is_dir());

    writer
        .log_entry(AuditEntry::new(AuditEventType::MessageSeen))
        .expect("write");
    assert!(path.exists());
}

#[test]
fn entry_has_timestamp_event_and_details() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("audit.jsonl");
    let writer = JsonlAuditWriter::new(path.clone()).unwrap();

    writer
        .log_entry(
            AuditEntry::new(AuditEventType::ArtifactWritten)
                .with_message("m1")
                .with("path", "src/app.ts")
                .with("bytes", 42_u64),
        )
        .unwrap();

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["event"], "artifact_written");
    assert_eq!(lines[0]["details"]["message_id"], "m1");
    assert_eq!(lines[0]["details"]["path"], "src/app.ts");
    assert_eq!(lines[0]["details"]["bytes"], 42);
    assert!(lines[0]["timestamp"].is_string());
}

#[test]
fn reopening_appends() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("audit.jsonl");

    JsonlAuditWriter::new(path.clone())
        .unwrap()
        .log_entry(AuditEntry::new(AuditEventType::MessageSeen))
        .unwrap();
    JsonlAuditWriter::new(path.clone())
        .unwrap()
        .log_entry(AuditEntry::new(AuditEventType::MessageResolved))
        .unwrap();

    let events: Vec<_> = read_lines(&path)
        .into_iter()
        .map(|l| l["event"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(events, vec!["message_seen", "message_resolved"]);
}

#[test]
fn concurrent_writes_produce_valid_lines() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("audit.jsonl");
    let writer = Arc::new(JsonlAuditWriter::new(path.clone()).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let writer = Arc::clone(&writer);
            std::thread::spawn(move || {
                for j in 0..25 {
                    writer
                        .log_entry(
                            AuditEntry::new(AuditEventType::BuildStep).with("n", i * 100 + j),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(read_lines(&path).len(), 100);
}
