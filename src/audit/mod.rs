//! Append-only audit trail of pipeline events.
//!
//! Provides the [`AuditLogger`] trait and associated types. The primary
//! implementation, [`JsonlAuditWriter`], appends one JSON object per line
//! to a single file. Rotation and retention are left to external tooling.

pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event type classification for audit log entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A new message was picked up for handling.
    MessageSeen,
    /// A message was recorded without extraction (not a delivery).
    MessageIgnored,
    /// An inbox record failed to decode and was set aside.
    MessageQuarantined,
    /// An artifact was written to disk.
    ArtifactWritten,
    /// An artifact path was refused by the path guard.
    ArtifactBlocked,
    /// An artifact had no resolvable path.
    ArtifactSkipped,
    /// An approved artifact could not be written.
    ArtifactFailed,
    /// A build step finished.
    BuildStep,
    /// The outcome report was sent.
    ReportSent,
    /// A message reached its terminal state.
    MessageResolved,
    /// A message exhausted its retry budget.
    DeadLettered,
    /// A remote agent was prompted through the actuation channel.
    AgentNotified,
    /// Fetching a mailbox failed.
    PollError,
    /// Any other handling failure.
    Error,
}

/// A single timestamped audit record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    /// UTC timestamp of the event.
    pub timestamp: DateTime<Utc>,
    /// Event classification.
    pub event: AuditEventType,
    /// Free-form structured detail.
    pub details: Value,
}

impl AuditEntry {
    /// Construct an entry with empty details.
    #[must_use]
    pub fn new(event: AuditEventType) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            details: Value::Object(Map::new()),
        }
    }

    /// Attach a detail field.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.details {
            map.insert(key.to_owned(), value.into());
        }
        self
    }

    /// Attach the message identity this event concerns.
    #[must_use]
    pub fn with_message(self, message_id: &str) -> Self {
        self.with("message_id", message_id)
    }

    /// Attach the mailbox this event concerns.
    #[must_use]
    pub fn with_mailbox(self, mailbox_id: &str) -> Self {
        self.with("mailbox_id", mailbox_id)
    }
}

/// Writes structured audit entries to a persistent store.
///
/// Implementations must be [`Send`] and [`Sync`] to allow sharing across
/// async task boundaries via [`std::sync::Arc`].
pub trait AuditLogger: Send + Sync {
    /// Record a single audit entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write operation fails.
    fn log_entry(&self, entry: AuditEntry) -> crate::Result<()>;
}

pub use writer::JsonlAuditWriter;

/// Record `entry`, logging instead of propagating a write failure.
///
/// Audit failures never abort the pipeline step being recorded.
pub fn record(logger: &dyn AuditLogger, entry: AuditEntry) {
    let event = entry.event;
    if let Err(err) = logger.log_entry(entry) {
        tracing::error!(?event, %err, "failed to record audit entry");
    }
}
