//! Poll loop: repeated fetch → filter → deliver cycles with jittered delay.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::audit::{self, AuditEntry, AuditEventType};
use crate::comms::{MessageSource, QuarantinedRecord};
use crate::config::{GlobalConfig, MailboxConfig};
use crate::models::message::Message;
use crate::notify::AgentNotifier;
use crate::pipeline::DeliveryPipeline;
use crate::{AppError, Result};

/// Counters for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Unread messages returned across all mailboxes.
    pub fetched: usize,
    /// Messages run through the delivery pipeline to completion.
    pub delivered: usize,
    /// Messages recorded without extraction.
    pub ignored: usize,
    /// Messages already in the processed set.
    pub skipped: usize,
    /// Pipeline runs that returned an error.
    pub failed: usize,
    /// Messages abandoned after reaching the failure cap.
    pub dead_lettered: usize,
    /// Records rejected at decode time.
    pub quarantined: usize,
    /// Mailboxes whose fetch failed.
    pub fetch_errors: usize,
}

/// Schedules delivery cycles over every configured mailbox.
pub struct PollLoop {
    config: Arc<GlobalConfig>,
    source: Arc<dyn MessageSource>,
    pipeline: Arc<DeliveryPipeline>,
    notifier: Option<Arc<dyn AgentNotifier>>,
    /// Quarantined identities already audited. The endpoint keeps returning
    /// them, so each is recorded once per process.
    quarantine_seen: Mutex<HashSet<String>>,
}

impl PollLoop {
    /// Loop over `config.mailboxes` using `source` and `pipeline`.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        source: Arc<dyn MessageSource>,
        pipeline: Arc<DeliveryPipeline>,
    ) -> Self {
        Self {
            config,
            source,
            pipeline,
            notifier: None,
            quarantine_seen: Mutex::new(HashSet::new()),
        }
    }

    /// Prompt `notifier` after every cycle that handled a delivery.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn AgentNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Run cycles until `cancel` fires.
    ///
    /// Cancellation is observed between messages and during the inter-cycle
    /// sleep; an in-flight delivery always runs to completion.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            mailboxes = self.config.mailboxes.len(),
            interval_seconds = self.config.polling.interval_seconds,
            "poll loop started"
        );

        while !cancel.is_cancelled() {
            self.run_cycle(&cancel).await;

            let delay = self.next_delay();
            debug!(?delay, "sleeping until next cycle");
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!("poll loop stopped");
    }

    /// Spawn [`PollLoop::run`] onto the runtime.
    #[must_use]
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Run the loop on its own task until `shutdown` resolves, then cancel
    /// and wait for the in-flight delivery to finish.
    ///
    /// Returns early when the loop task ends without being asked to.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the loop task panicked or stopped before
    /// `shutdown` resolved.
    pub async fn run_until<F>(self: Arc<Self>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let cancel = CancellationToken::new();
        let mut handle = self.spawn(cancel.clone());

        tokio::select! {
            () = shutdown => {
                info!("shutdown requested; finishing in-flight delivery");
                cancel.cancel();
                handle
                    .await
                    .map_err(|err| AppError::Io(format!("poll loop task failed: {err}")))
            }
            joined = &mut handle => {
                cancel.cancel();
                let err = match joined {
                    Ok(()) => AppError::Io("poll loop stopped without a shutdown request".into()),
                    Err(err) => AppError::Io(format!("poll loop task failed: {err}")),
                };
                error!(%err, "poll loop ended unexpectedly");
                Err(err)
            }
        }
    }

    /// Run exactly one cycle.
    pub async fn run_once(&self) -> CycleSummary {
        self.run_cycle(&CancellationToken::new()).await
    }

    /// Base interval plus uniform jitter.
    fn next_delay(&self) -> Duration {
        let polling = &self.config.polling;
        let jitter_ms = match polling.jitter_seconds {
            0 => 0,
            max => rand::thread_rng().gen_range(0..=max.saturating_mul(1000)),
        };
        Duration::from_secs(polling.interval_seconds) + Duration::from_millis(jitter_ms)
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> CycleSummary {
        let span = info_span!("poll_cycle", cycle_id = %Uuid::new_v4());
        async {
            let mut summary = CycleSummary::default();
            for mailbox in &self.config.mailboxes {
                if cancel.is_cancelled() {
                    break;
                }
                self.poll_mailbox(mailbox, cancel, &mut summary).await;
            }

            if summary.delivered > 0 {
                self.notify().await;
            }

            info!(
                fetched = summary.fetched,
                delivered = summary.delivered,
                ignored = summary.ignored,
                failed = summary.failed,
                dead_lettered = summary.dead_lettered,
                quarantined = summary.quarantined,
                "cycle complete"
            );
            summary
        }
        .instrument(span)
        .await
    }

    async fn poll_mailbox(
        &self,
        mailbox: &MailboxConfig,
        cancel: &CancellationToken,
        summary: &mut CycleSummary,
    ) {
        let inbox = match self.source.fetch(&mailbox.id).await {
            Ok(inbox) => inbox,
            Err(err) => {
                warn!(mailbox_id = %mailbox.id, %err, transient = err.is_transient(), "inbox fetch failed");
                summary.fetch_errors += 1;
                self.log(
                    AuditEntry::new(AuditEventType::PollError)
                        .with_mailbox(&mailbox.id)
                        .with("error", err.to_string()),
                );
                return;
            }
        };

        for record in &inbox.quarantined {
            summary.quarantined += 1;
            self.quarantine(mailbox, record);
        }

        summary.fetched += inbox.messages.len();
        let mut seen = HashSet::new();

        for message in &inbox.messages {
            if cancel.is_cancelled() {
                info!("stop requested; leaving remaining messages for the next run");
                break;
            }
            if !seen.insert(message.id.as_str()) {
                continue;
            }
            if self.pipeline.state().is_processed(&message.id) {
                summary.skipped += 1;
                continue;
            }
            if let Some(reason) = self.ignore_reason(mailbox, message) {
                self.ignore(mailbox, message, reason);
                summary.ignored += 1;
                continue;
            }
            self.handle(mailbox, message, summary).await;
        }
    }

    fn quarantine(&self, mailbox: &MailboxConfig, record: &QuarantinedRecord) {
        let entry = AuditEntry::new(AuditEventType::MessageQuarantined)
            .with_mailbox(&mailbox.id)
            .with("error", record.error.as_str());
        let Some(id) = &record.id else {
            self.log(entry);
            return;
        };
        let first_seen = self
            .quarantine_seen
            .lock()
            .map(|mut seen| seen.insert(id.clone()))
            .unwrap_or(true);
        if first_seen {
            warn!(message_id = %id, error = %record.error, "inbox record quarantined");
            self.log(entry.with_message(id));
        }
    }

    fn ignore_reason(&self, mailbox: &MailboxConfig, message: &Message) -> Option<&'static str> {
        if message.from_agent == self.config.comms.agent_id || message.from_agent == mailbox.id {
            Some("self-authored")
        } else if !mailbox.accepts(&message.from_agent, message.subject.as_deref()) {
            Some("not a delivery")
        } else {
            None
        }
    }

    fn ignore(&self, mailbox: &MailboxConfig, message: &Message, reason: &str) {
        debug!(message_id = %message.id, reason, "ignoring message");
        if let Err(err) = self.pipeline.state().mark_processed(&message.id) {
            warn!(message_id = %message.id, %err, "failed to persist ignored message");
        }
        self.log(
            AuditEntry::new(AuditEventType::MessageIgnored)
                .with_mailbox(&mailbox.id)
                .with_message(&message.id)
                .with("from_agent", message.from_agent.as_str())
                .with("reason", reason),
        );
    }

    async fn handle(&self, mailbox: &MailboxConfig, message: &Message, summary: &mut CycleSummary) {
        let err = match self.pipeline.deliver(&mailbox.id, message).await {
            Ok(_) => {
                summary.delivered += 1;
                return;
            }
            Err(err) => err,
        };

        summary.failed += 1;
        error!(message_id = %message.id, %err, "delivery failed");
        self.log(
            AuditEntry::new(AuditEventType::Error)
                .with_mailbox(&mailbox.id)
                .with_message(&message.id)
                .with("error", err.to_string()),
        );

        let attempts = match self.pipeline.state().record_failure(&message.id) {
            Ok(count) => count,
            Err(state_err) => {
                warn!(message_id = %message.id, %state_err, "failed to persist failure count");
                self.pipeline.state().failure_count(&message.id)
            }
        };

        if attempts >= self.config.polling.max_failures {
            self.pipeline
                .dead_letter(&mailbox.id, message, attempts, &err.to_string())
                .await;
            summary.dead_lettered += 1;
        }
    }

    async fn notify(&self) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let prompt = self.config.notify.prompt.as_str();
        let entry = match notifier.notify_agent(prompt).await {
            Ok(()) => AuditEntry::new(AuditEventType::AgentNotified),
            Err(err) => {
                warn!(%err, target_agent = notifier.target(), "agent notification failed");
                AuditEntry::new(AuditEventType::Error)
                    .with("stage", "notify")
                    .with("error", err.to_string())
            }
        };
        self.log(entry.with("target_agent", notifier.target()));
    }

    fn log(&self, entry: AuditEntry) {
        audit::record(self.pipeline.audit().as_ref(), entry);
    }
}
