//! End-to-end delivery pipeline scenarios over in-memory collaborators.

use std::fs;
use std::sync::atomic::Ordering;

use agent_courier::audit::AuditEventType;
use agent_courier::build::CommandOutput;
use agent_courier::models::message::{MessageKind, MessageStatus, Priority};
use agent_courier::models::outcome::{BuildStep, DeliveryStage, FileOutcome, StepStatus};
use agent_courier::AppError;

use super::test_helpers::{delivery, FakeRunner, Harness, MAILBOX};

fn three_artifact_body() -> String {
    [
        "Here is the batch.",
        "```",
        "// filepath: ../../etc/passwd",
        "root::0:0",
        "```",
        "```ts",
        "// filepath: src/app.ts",
        "export const app = 1;",
        "```",
        "```",
        "orphan block",
        "```",
    ]
    .join("\n")
}

#[tokio::test]
async fn partial_failure_is_reported_and_resolved() {
    let runner = FakeRunner::failing(
        "compose_up",
        Ok(CommandOutput {
            exit_code: Some(1),
            success: false,
            stdout: String::new(),
            stderr: "failed to solve: dockerfile parse error".into(),
        }),
    );
    let message = delivery("m1", "DELIVERY: batch", &three_artifact_body());
    let h = Harness::build(tempfile::tempdir().unwrap(), "", vec![], runner);

    let outcome = h.pipeline.deliver(MAILBOX, &message).await.expect("delivered");

    assert_eq!(outcome.report.blocked_count(), 1);
    assert_eq!(outcome.report.written_count(), 1);
    assert!(matches!(outcome.report.files[2], FileOutcome::Skipped { .. }));
    assert!(outcome.report.build_failed());
    assert_eq!(
        outcome.report.step(BuildStep::Verify),
        Some(&StepStatus::Skipped {
            reason: "build failed".into()
        })
    );
    assert_eq!(outcome.final_stage(), Some(DeliveryStage::Resolved));
    assert!(outcome.stages.contains(&DeliveryStage::BuildFailed));
    assert_eq!(
        outcome.report.build_error(),
        Some(AppError::Build(
            "Building and starting: FAIL (exit 1): failed to solve: dockerfile parse error".into()
        ))
    );

    let written = fs::read_to_string(h.root().join("src/app.ts")).unwrap();
    assert_eq!(written, "export const app = 1;");
    assert!(!h.root().join("etc/passwd").exists());

    assert!(h.state.is_processed("m1"));
    let reports = h.source.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].to_agent, "eng");
    assert_eq!(reports[0].priority, Priority::High);
    assert!(reports[0].body.contains("BLOCKED: ../../etc/passwd"));
    assert!(reports[0].body.contains("WRITTEN: src/app.ts (21 bytes)"));
    assert!(reports[0].body.contains("Building and starting: FAIL (exit 1)"));
    assert_eq!(
        h.source.marked(),
        vec![(MAILBOX.to_owned(), "m1".to_owned(), MessageStatus::Resolved)]
    );
}

#[tokio::test]
async fn zero_artifact_message_skips_build() {
    let h = Harness::new(vec![]);
    let message = delivery("m2", "DELIVERY notes", "No code this time, just a status update.");

    let outcome = h.pipeline.deliver(MAILBOX, &message).await.expect("delivered");

    assert!(outcome.report.files.is_empty());
    assert!(outcome.report.build.is_empty());
    assert!(h.runner.names().is_empty());
    assert_eq!(
        outcome.stages,
        vec![
            DeliveryStage::Received,
            DeliveryStage::Extracted,
            DeliveryStage::Reported,
            DeliveryStage::Resolved,
        ]
    );
    let reports = h.source.reports();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].body.contains("no files"));
    assert!(h.state.is_processed("m2"));
}

#[tokio::test]
async fn successful_build_runs_full_sequence() {
    let h = Harness::new(vec![]);
    let body = "## src/lib/redis.ts\n```ts\nexport const redis = {};\n```\n";
    let message = delivery("m3", "DELIVERY: redis", body);

    let outcome = h.pipeline.deliver(MAILBOX, &message).await.expect("delivered");

    assert_eq!(
        h.runner.names(),
        vec!["compose_down", "image_prune", "compose_up", "compose_ps"]
    );
    assert_eq!(
        outcome.report.step(BuildStep::Health),
        Some(&StepStatus::Ok {
            detail: Some("HTTP 200".into())
        })
    );
    assert!(outcome.stages.contains(&DeliveryStage::Verified));
    assert!(outcome.report.build_ran());
    assert_eq!(outcome.report.build_error(), None);
    assert_eq!(h.source.reports()[0].priority, Priority::Normal);
    assert_eq!(h.audit.count(AuditEventType::BuildStep), 5);
}

#[tokio::test]
async fn blocked_only_delivery_does_not_build() {
    let h = Harness::new(vec![]);
    let body = "```\n# filepath: /etc/shadow\nx\n```\n";
    let message = delivery("m4", "DELIVERY: escape", body);

    let outcome = h.pipeline.deliver(MAILBOX, &message).await.expect("delivered");

    assert_eq!(outcome.report.blocked_count(), 1);
    assert!(h.runner.names().is_empty());
    assert_eq!(h.audit.count(AuditEventType::ArtifactBlocked), 1);
    assert_eq!(outcome.final_stage(), Some(DeliveryStage::Resolved));
}

#[tokio::test]
async fn missing_compose_file_skips_every_step() {
    let h = Harness::new(vec![]);
    fs::remove_file(h.root().join("docker-compose.yml")).unwrap();
    let body = "```\n// filepath: src/a.ts\na\n```\n";

    let outcome = h
        .pipeline
        .deliver(MAILBOX, &delivery("m5", "DELIVERY: a", body))
        .await
        .expect("delivered");

    assert_eq!(outcome.report.build.len(), 5);
    assert!(outcome
        .report
        .build
        .iter()
        .all(|r| matches!(r.status, StepStatus::Skipped { .. })));
    assert!(!outcome.report.build_failed());
    assert!(!outcome.report.build_ran());
    assert!(outcome.stages.contains(&DeliveryStage::BuildSkipped));
    assert!(!outcome.stages.contains(&DeliveryStage::Verified));
    assert!(h.runner.names().is_empty());
}

#[tokio::test]
async fn report_and_resolve_failures_still_record_processed() {
    let h = Harness::new(vec![]);
    h.source.fail_send.store(true, Ordering::SeqCst);
    h.source.fail_mark.store(true, Ordering::SeqCst);

    let outcome = h
        .pipeline
        .deliver(MAILBOX, &delivery("m6", "DELIVERY notes", "plain"))
        .await
        .expect("delivered");

    assert!(!outcome.report_sent);
    assert!(!outcome.remote_resolved);
    assert_eq!(outcome.final_stage(), Some(DeliveryStage::Resolved));
    assert!(h.state.is_processed("m6"));
}

#[tokio::test]
async fn oversized_body_fails_extraction() {
    let h = Harness::build(
        tempfile::tempdir().unwrap(),
        "[extract]\nmax_body_bytes = 16\n",
        vec![],
        FakeRunner::default(),
    );
    let message = delivery("m7", "DELIVERY: big", "this body is certainly longer than sixteen bytes");

    let err = h.pipeline.deliver(MAILBOX, &message).await.unwrap_err();

    assert!(matches!(err, AppError::Protocol(_)));
    assert!(!h.state.is_processed("m7"));
    assert!(h.source.sent().is_empty());
}

#[tokio::test]
async fn duplicate_targets_last_write_wins() {
    let h = Harness::new(vec![]);
    let body = [
        "```",
        "// filepath: src/dup.ts",
        "first",
        "```",
        "## src/dup.ts",
        "```",
        "second",
        "```",
    ]
    .join("\n");

    let outcome = h
        .pipeline
        .deliver(MAILBOX, &delivery("m8", "DELIVERY: dup", &body))
        .await
        .expect("delivered");

    assert_eq!(outcome.report.written_count(), 2);
    assert_eq!(fs::read_to_string(h.root().join("src/dup.ts")).unwrap(), "second");
    assert_eq!(h.source.sent()[0].1.kind, MessageKind::Report);
}
