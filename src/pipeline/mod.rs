//! Delivery pipeline: one message through extract, write, build, report,
//! and resolve.
//!
//! Stages advance `Received → Extracted → (BuildRun → Verified | BuildFailed
//! | BuildSkipped) → Reported → Resolved`. Only an extraction failure stops a
//! message short of `Resolved`; every later failure is folded into the report.

pub mod report;

use std::sync::Arc;

use tracing::{info, info_span, warn, Instrument};

use crate::audit::{self, AuditEntry, AuditEventType, AuditLogger};
use crate::build::{BuildRunner, CommandRunner, HealthProbe};
use crate::comms::MessageSource;
use crate::config::GlobalConfig;
use crate::extract::Extractor;
use crate::models::artifact::Artifact;
use crate::models::message::{Message, MessageStatus};
use crate::models::outcome::{DeliveryOutcome, DeliveryReport, DeliveryStage, FileOutcome};
use crate::persistence::StateStore;
use crate::sandbox::{FileWriter, PathGuard};
use crate::Result;

pub use report::Reporter;

/// Orchestrates a single delivery message. All collaborators are injected.
pub struct DeliveryPipeline {
    extractor: Extractor,
    writer: FileWriter,
    builder: Option<BuildRunner>,
    reporter: Reporter,
    source: Arc<dyn MessageSource>,
    state: Arc<StateStore>,
    audit: Arc<dyn AuditLogger>,
}

impl DeliveryPipeline {
    /// Assemble a pipeline from its parts. `builder` is `None` when rebuilds
    /// are disabled.
    #[must_use]
    pub fn new(
        extractor: Extractor,
        writer: FileWriter,
        builder: Option<BuildRunner>,
        reporter: Reporter,
        source: Arc<dyn MessageSource>,
        state: Arc<StateStore>,
        audit: Arc<dyn AuditLogger>,
    ) -> Self {
        Self {
            extractor,
            writer,
            builder,
            reporter,
            source,
            state,
            audit,
        }
    }

    /// Wire a pipeline from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the extraction patterns fail to compile
    /// or the workspace and allowlisted roots cannot be resolved.
    pub fn from_config(
        config: &GlobalConfig,
        source: Arc<dyn MessageSource>,
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn HealthProbe>,
        state: Arc<StateStore>,
        audit: Arc<dyn AuditLogger>,
    ) -> Result<Self> {
        let extractor = Extractor::new(config.extract)?;
        let guard = PathGuard::new(&config.workspace_root, &config.allowed_roots)?;
        let builder = config.build.enabled.then(|| {
            BuildRunner::new(
                runner,
                probe,
                config.workspace_root.clone(),
                config.compose_path(),
                config.build.health_url.clone(),
            )
        });
        let reporter = Reporter::new(Arc::clone(&source), config.comms.platform.clone());

        Ok(Self::new(
            extractor,
            FileWriter::new(guard),
            builder,
            reporter,
            source,
            state,
            audit,
        ))
    }

    /// Shared state store.
    #[must_use]
    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    /// Shared audit logger.
    #[must_use]
    pub fn audit(&self) -> &Arc<dyn AuditLogger> {
        &self.audit
    }

    /// Handle `message` received in `mailbox_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` when extraction rejects the message. The
    /// message is then left unprocessed for the caller's retry policy.
    pub async fn deliver(&self, mailbox_id: &str, message: &Message) -> Result<DeliveryOutcome> {
        let span = info_span!("deliver", message_id = %message.id, mailbox_id);
        self.run(mailbox_id, message).instrument(span).await
    }

    async fn run(&self, mailbox_id: &str, message: &Message) -> Result<DeliveryOutcome> {
        let mut stages = vec![DeliveryStage::Received];
        self.log(
            AuditEntry::new(AuditEventType::MessageSeen)
                .with_mailbox(mailbox_id)
                .with_message(&message.id)
                .with("from_agent", message.from_agent.as_str())
                .with("subject", message.subject_or_empty()),
        );

        let artifacts = self.extractor.extract(message)?;
        stages.push(DeliveryStage::Extracted);
        info!(artifacts = artifacts.len(), "extraction finished");

        let mut report = DeliveryReport::new(&message.id, message.subject_or_empty());
        if artifacts.is_empty() {
            report
                .warnings
                .push(format!("No code blocks found in: {}", message.subject_or_empty()));
        }
        for artifact in &artifacts {
            report.files.push(self.place(artifact));
        }

        if report.written_count() > 0 {
            match &self.builder {
                Some(builder) => {
                    stages.push(DeliveryStage::BuildRun);
                    report.build = builder.rebuild().await;
                    self.log_build(&message.id, &report);
                    stages.push(match report.build_error() {
                        Some(err) => {
                            warn!(%err, "rebuild failed; remaining build steps skipped");
                            DeliveryStage::BuildFailed
                        }
                        None if report.build_ran() => DeliveryStage::Verified,
                        None => DeliveryStage::BuildSkipped,
                    });
                }
                None => report.warnings.push("Rebuild disabled by configuration".into()),
            }
        }

        let report_sent = self.report(mailbox_id, message, &report).await;
        stages.push(DeliveryStage::Reported);

        let remote_resolved = self.resolve(mailbox_id, &message.id).await;
        stages.push(DeliveryStage::Resolved);

        info!(
            written = report.written_count(),
            blocked = report.blocked_count(),
            build_failed = report.build_failed(),
            report_sent,
            remote_resolved,
            "delivery handled"
        );

        Ok(DeliveryOutcome {
            stages,
            report,
            report_sent,
            remote_resolved,
        })
    }

    /// Write one artifact and audit what happened to it.
    fn place(&self, artifact: &Artifact) -> FileOutcome {
        let (outcome, summary) = self.writer.place(artifact);
        let entry = match &outcome {
            FileOutcome::Written { path, bytes } => {
                let entry = AuditEntry::new(AuditEventType::ArtifactWritten)
                    .with("path", path.as_str())
                    .with("bytes", *bytes);
                match summary {
                    Some(summary) => entry.with("sha256", summary.sha256),
                    None => entry,
                }
            }
            FileOutcome::Blocked { path, reason } => {
                warn!(path = %path, reason = %reason, "artifact blocked");
                AuditEntry::new(AuditEventType::ArtifactBlocked)
                    .with("path", path.as_str())
                    .with("reason", reason.as_str())
            }
            FileOutcome::Skipped { bytes } => {
                AuditEntry::new(AuditEventType::ArtifactSkipped).with("bytes", *bytes)
            }
            FileOutcome::Failed { path, error } => {
                warn!(path = %path, error = %error, "artifact write failed");
                AuditEntry::new(AuditEventType::ArtifactFailed)
                    .with("path", path.as_str())
                    .with("error", error.as_str())
            }
        };
        self.log(entry.with_message(&artifact.source_message_id));
        outcome
    }

    fn log_build(&self, message_id: &str, report: &DeliveryReport) {
        for result in &report.build {
            self.log(
                AuditEntry::new(AuditEventType::BuildStep)
                    .with_message(message_id)
                    .with("step", serde_json::to_value(result.step).unwrap_or_default())
                    .with("status", serde_json::to_value(&result.status).unwrap_or_default()),
            );
        }
    }

    /// Send the outcome report; returns whether it was delivered.
    async fn report(&self, mailbox_id: &str, message: &Message, report: &DeliveryReport) -> bool {
        match self.reporter.send(mailbox_id, message, report).await {
            Ok(()) => {
                self.log(
                    AuditEntry::new(AuditEventType::ReportSent)
                        .with_message(&message.id)
                        .with("to_agent", message.from_agent.as_str())
                        .with("written", report.written_count())
                        .with("blocked", report.blocked_count())
                        .with("build_failed", report.build_failed()),
                );
                true
            }
            Err(err) => {
                warn!(%err, "failed to send outcome report");
                self.log(
                    AuditEntry::new(AuditEventType::Error)
                        .with_message(&message.id)
                        .with("stage", "report")
                        .with("error", err.to_string()),
                );
                false
            }
        }
    }

    /// Give up on `message` after `attempts` failures: record it as
    /// processed and tell the sender.
    pub async fn dead_letter(&self, mailbox_id: &str, message: &Message, attempts: u32, error: &str) {
        warn!(message_id = %message.id, attempts, error, "dead-lettering message");
        self.log(
            AuditEntry::new(AuditEventType::DeadLettered)
                .with_mailbox(mailbox_id)
                .with_message(&message.id)
                .with("attempts", attempts)
                .with("error", error),
        );

        if let Err(err) = self
            .reporter
            .send_failure(mailbox_id, message, attempts, error)
            .await
        {
            warn!(message_id = %message.id, %err, "failed to send failure report");
        }

        self.resolve(mailbox_id, &message.id).await;
    }

    /// Record `message_id` as processed locally, then remotely. Returns
    /// whether the remote status update succeeded.
    async fn resolve(&self, mailbox_id: &str, message_id: &str) -> bool {
        if let Err(err) = self.state.mark_processed(message_id) {
            warn!(message_id, %err, "failed to persist processed message");
            self.log(
                AuditEntry::new(AuditEventType::Error)
                    .with_message(message_id)
                    .with("stage", "state")
                    .with("error", err.to_string()),
            );
        }

        let remote = self
            .source
            .mark(mailbox_id, message_id, MessageStatus::Resolved)
            .await;
        if let Err(err) = &remote {
            warn!(message_id, %err, "failed to mark message resolved remotely");
        }
        self.log(
            AuditEntry::new(AuditEventType::MessageResolved)
                .with_mailbox(mailbox_id)
                .with_message(message_id)
                .with("remote_resolved", remote.is_ok()),
        );
        remote.is_ok()
    }

    fn log(&self, entry: AuditEntry) {
        audit::record(self.audit.as_ref(), entry);
    }
}
