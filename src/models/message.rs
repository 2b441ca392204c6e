//! Message records exchanged with the collaboration endpoint.

use serde::{Deserialize, Deserializer, Serialize};

/// Read status of a message in its mailbox.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Not yet handled.
    #[default]
    Unread,
    /// Handled; terminal.
    Resolved,
    /// Any status this daemon does not act on.
    #[serde(other)]
    Other,
}

impl MessageStatus {
    /// Wire value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unread => "unread",
            Self::Resolved => "resolved",
            Self::Other => "other",
        }
    }
}

/// Message classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Work request addressed to an agent.
    #[default]
    Directive,
    /// Outcome or status report.
    Report,
    /// Any kind this daemon does not recognize.
    #[serde(other)]
    Other,
}

/// Message priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background.
    Low,
    /// Default.
    #[default]
    Normal,
    /// Needs attention.
    High,
    /// Needs immediate attention.
    Urgent,
    /// Any priority this daemon does not recognize.
    #[serde(other)]
    Other,
}

impl Priority {
    /// Unrecognized priorities are echoed back as `Normal`.
    #[must_use]
    pub fn known_or_normal(self) -> Self {
        match self {
            Self::Other => Self::Normal,
            known => known,
        }
    }
}

/// A message received from a mailbox. Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Identity, unique within the mailbox.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// Sender agent id.
    #[serde(deserialize_with = "string_or_number")]
    pub from_agent: String,
    /// Recipient agent id.
    #[serde(deserialize_with = "string_or_number")]
    pub to_agent: String,
    /// Optional subject line.
    #[serde(default)]
    pub subject: Option<String>,
    /// Free-text body.
    #[serde(default, deserialize_with = "null_as_default")]
    pub body: String,
    /// Priority.
    #[serde(default, deserialize_with = "null_as_default")]
    pub priority: Priority,
    /// Read status.
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: MessageStatus,
    /// Classification.
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: MessageKind,
    /// Creation timestamp as reported by the endpoint.
    #[serde(default, deserialize_with = "null_as_default")]
    pub created_at: String,
}

impl Message {
    /// Subject, or an empty string.
    #[must_use]
    pub fn subject_or_empty(&self) -> &str {
        self.subject.as_deref().unwrap_or_default()
    }
}

/// The endpoint emits numeric identities; everything downstream treats them
/// as opaque strings.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

/// Explicit `null` on an optional field decodes like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Raw inbox envelope; records are decoded one by one so a single malformed
/// entry cannot poison the batch.
#[derive(Debug, Clone, Deserialize)]
pub struct InboxResponse {
    /// Undecoded message records.
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

/// Outgoing message body for `POST /send`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Recipient agent id.
    pub to_agent: String,
    /// Subject line.
    pub subject: String,
    /// Body text.
    pub body: String,
    /// Classification.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Priority.
    pub priority: Priority,
    /// Originating platform tag.
    pub platform: String,
}
