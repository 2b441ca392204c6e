//! Outcome report composition and delivery.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::Utc;

use crate::comms::MessageSource;
use crate::models::message::{Message, MessageKind, OutgoingMessage, Priority};
use crate::models::outcome::{DeliveryReport, FileOutcome, StepStatus};
use crate::Result;

/// Render `report` as the plain-text body sent back to the sender.
#[must_use]
pub fn render(report: &DeliveryReport) -> String {
    let skipped = report
        .files
        .iter()
        .filter(|f| matches!(f, FileOutcome::Skipped { .. }))
        .count();

    let mut body = String::new();
    let _ = writeln!(
        body,
        "Delivery Report ({})",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(body, "Message: {}", report.message_id);
    let _ = writeln!(body, "Subject: {}", report.subject);
    let _ = writeln!(
        body,
        "Files: {} written, {} blocked, {} skipped",
        report.written_count(),
        report.blocked_count(),
        skipped
    );

    body.push_str("\n== FILES ==\n");
    if report.files.is_empty() {
        body.push_str("no files\n");
    }
    for file in &report.files {
        let _ = writeln!(body, "{file}");
    }

    if !report.warnings.is_empty() {
        body.push_str("\n== WARNINGS ==\n");
        for warning in &report.warnings {
            let _ = writeln!(body, "{warning}");
        }
    }

    if !report.build.is_empty() {
        body.push_str("\n== DOCKER ==\n");
        for result in &report.build {
            let _ = writeln!(body, "{result}");
            if let StepStatus::Failed { stderr, .. } = &result.status {
                if !stderr.is_empty() {
                    let _ = writeln!(body, "  stderr: {stderr}");
                }
            }
        }
    }

    body.trim_end().to_owned()
}

/// Sends outcome reports through the message source.
pub struct Reporter {
    source: Arc<dyn MessageSource>,
    platform: String,
}

impl Reporter {
    /// Reporter tagging outgoing messages with `platform`.
    #[must_use]
    pub fn new(source: Arc<dyn MessageSource>, platform: impl Into<String>) -> Self {
        Self {
            source,
            platform: platform.into(),
        }
    }

    /// Build the outgoing report for `message`.
    #[must_use]
    pub fn compose(&self, message: &Message, report: &DeliveryReport) -> OutgoingMessage {
        let priority = if report.build_failed() {
            Priority::High
        } else {
            message.priority.known_or_normal()
        };
        OutgoingMessage {
            to_agent: message.from_agent.clone(),
            subject: format!("DEPLOY REPORT: {}", message.subject_or_empty()),
            body: render(report),
            kind: MessageKind::Report,
            priority,
            platform: self.platform.clone(),
        }
    }

    /// Send the report for `message` from the mailbox that received it.
    ///
    /// # Errors
    ///
    /// Propagates the message source failure.
    pub async fn send(
        &self,
        mailbox_id: &str,
        message: &Message,
        report: &DeliveryReport,
    ) -> Result<()> {
        let outgoing = self.compose(message, report);
        self.source.send(mailbox_id, &outgoing).await
    }

    /// Tell the sender that `message` was abandoned after repeated failures.
    ///
    /// # Errors
    ///
    /// Propagates the message source failure.
    pub async fn send_failure(
        &self,
        mailbox_id: &str,
        message: &Message,
        attempts: u32,
        error: &str,
    ) -> Result<()> {
        let outgoing = OutgoingMessage {
            to_agent: message.from_agent.clone(),
            subject: format!("DEPLOY FAILED: {}", message.subject_or_empty()),
            body: format!(
                "Message {} was abandoned after {attempts} failed attempts.\nLast error: {error}",
                message.id
            ),
            kind: MessageKind::Report,
            priority: Priority::High,
            platform: self.platform.clone(),
        };
        self.source.send(mailbox_id, &outgoing).await
    }
}
