//! Actuation channel: prompt a remote agent to check its inbox.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::info;

use crate::comms::MessageSource;
use crate::models::message::{MessageKind, OutgoingMessage, Priority};
use crate::Result;

/// Capability to nudge a remote agent.
pub trait AgentNotifier: Send + Sync {
    /// Deliver `prompt` to the agent this notifier targets.
    ///
    /// # Errors
    ///
    /// Propagates the underlying transport failure.
    fn notify_agent<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Agent receiving the prompt.
    fn target(&self) -> &str;
}

/// Sends the prompt as a directive through the message source.
pub struct CommsNotifier {
    source: Arc<dyn MessageSource>,
    sender: String,
    target_agent: String,
    platform: String,
}

impl CommsNotifier {
    /// Notifier sending as `sender` to `target_agent`.
    #[must_use]
    pub fn new(
        source: Arc<dyn MessageSource>,
        sender: impl Into<String>,
        target_agent: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            source,
            sender: sender.into(),
            target_agent: target_agent.into(),
            platform: platform.into(),
        }
    }
}

impl AgentNotifier for CommsNotifier {
    fn notify_agent<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let message = OutgoingMessage {
                to_agent: self.target_agent.clone(),
                subject: "CHECK INBOX".into(),
                body: prompt.to_owned(),
                kind: MessageKind::Directive,
                priority: Priority::Normal,
                platform: self.platform.clone(),
            };
            self.source.send(&self.sender, &message).await?;
            info!(target_agent = %self.target_agent, "agent notified");
            Ok(())
        })
    }

    fn target(&self) -> &str {
        &self.target_agent
    }
}
