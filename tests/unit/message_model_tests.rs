//! Wire decoding of messages and serialization of outcome records.

use agent_courier::comms::client::decode_records;
use agent_courier::models::message::{Message, MessageKind, MessageStatus, Priority};
use agent_courier::models::outcome::{BuildStep, BuildStepResult, FileOutcome, StepStatus};
use serde_json::json;

#[test]
fn numeric_identities_become_strings() {
    let message: Message = serde_json::from_value(json!({
        "id": 42, "from_agent": 2002, "to_agent": "2001",
        "body": "b", "status": "unread", "type": "report"
    }))
    .expect("decodes");

    assert_eq!(message.id, "42");
    assert_eq!(message.from_agent, "2002");
    assert_eq!(message.kind, MessageKind::Report);
    assert_eq!(message.priority, Priority::Normal);
    assert_eq!(message.subject_or_empty(), "");
}

#[test]
fn unknown_status_and_kind_decode_as_other() {
    let message: Message = serde_json::from_value(json!({
        "id": "1", "from_agent": "a", "to_agent": "b",
        "status": "archived", "type": "broadcast"
    }))
    .expect("decodes");

    assert_eq!(message.status, MessageStatus::Other);
    assert_eq!(message.kind, MessageKind::Other);
}

#[test]
fn unknown_priority_decodes_as_other_and_reports_as_normal() {
    let message: Message = serde_json::from_value(json!({
        "id": "7", "from_agent": "a", "to_agent": "b", "priority": "critical"
    }))
    .expect("decodes");

    assert_eq!(message.priority, Priority::Other);
    assert_eq!(message.priority.known_or_normal(), Priority::Normal);
    assert_eq!(Priority::Urgent.known_or_normal(), Priority::Urgent);
}

#[test]
fn null_optional_fields_decode_as_defaults() {
    let message: Message = serde_json::from_value(json!({
        "id": "8", "from_agent": "a", "to_agent": "b",
        "subject": null, "body": null, "priority": null,
        "status": null, "type": null, "created_at": null
    }))
    .expect("decodes");

    assert_eq!(message.body, "");
    assert_eq!(message.created_at, "");
    assert_eq!(message.priority, Priority::Normal);
    assert_eq!(message.status, MessageStatus::Unread);
    assert_eq!(message.kind, MessageKind::Directive);
}

#[test]
fn decode_records_keeps_deliveries_with_loose_optional_fields() {
    let inbox = decode_records(vec![
        json!({"id": "1", "from_agent": "a", "to_agent": "b", "priority": "critical"}),
        json!({"id": "2", "from_agent": "a", "to_agent": "b", "created_at": null, "body": "x"}),
    ]);

    assert!(inbox.quarantined.is_empty());
    assert_eq!(inbox.messages.len(), 2);
}

#[test]
fn decode_records_quarantines_per_record() {
    let inbox = decode_records(vec![
        json!({"id": "1", "from_agent": "a", "to_agent": "b", "status": "unread"}),
        json!({"id": 2, "from_agent": ["not", "a", "string"], "to_agent": "b"}),
        json!("just a string"),
        json!({"id": "3", "from_agent": "a", "to_agent": "b", "status": "resolved"}),
    ]);

    assert_eq!(inbox.messages.len(), 1);
    assert_eq!(inbox.messages[0].id, "1");
    assert_eq!(inbox.quarantined.len(), 2);
    assert_eq!(inbox.quarantined[0].id.as_deref(), Some("2"));
    assert_eq!(inbox.quarantined[1].id, None);
}

#[test]
fn outcome_lines_match_report_format() {
    let written = FileOutcome::Written {
        path: "src/a.ts".into(),
        bytes: 12,
    };
    let skipped = FileOutcome::Skipped { bytes: 7 };
    assert_eq!(written.to_string(), "WRITTEN: src/a.ts (12 bytes)");
    assert_eq!(
        skipped.to_string(),
        "SKIPPED: code block with no filepath (7 bytes)"
    );

    let health = BuildStepResult::new(
        BuildStep::Health,
        StepStatus::Ok {
            detail: Some("HTTP 200".into()),
        },
    );
    assert_eq!(health.to_string(), "Health check: HTTP 200");
    assert_eq!(
        BuildStepResult::new(BuildStep::Build, StepStatus::TimedOut).to_string(),
        "Building and starting: TIMEOUT"
    );
}

#[test]
fn step_status_serializes_with_tag() {
    let value = serde_json::to_value(StepStatus::Failed {
        exit_code: Some(2),
        stderr: "bad".into(),
    })
    .unwrap();
    assert_eq!(value, json!({"status": "failed", "exit_code": 2, "stderr": "bad"}));
}
