//! Source artifacts recognized inside a message body.

/// A candidate file extracted from a message. Transient: never persisted
/// beyond the write step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Untrusted relative target path; `None` when no rule supplied one.
    pub target_path: Option<String>,
    /// File content.
    pub content: String,
    /// Identity of the message this artifact came from.
    pub source_message_id: String,
}

impl Artifact {
    /// Construct an artifact for `source_message_id`.
    #[must_use]
    pub fn new(
        target_path: Option<String>,
        content: impl Into<String>,
        source_message_id: impl Into<String>,
    ) -> Self {
        Self {
            target_path,
            content: content.into(),
            source_message_id: source_message_id.into(),
        }
    }
}
