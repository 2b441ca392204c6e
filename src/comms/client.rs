//! `reqwest` implementation of [`MessageSource`] for the agent-comms API.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{FetchedInbox, MessageSource, QuarantinedRecord, SourceFuture};
use crate::config::GlobalConfig;
use crate::models::message::{InboxResponse, Message, MessageStatus, OutgoingMessage};
use crate::{AppError, Result};

const AGENT_ID_HEADER: &str = "X-Agent-Id";
const AGENT_KEY_HEADER: &str = "X-Agent-Key";

/// HTTP client holding one key per agent identity it acts as.
#[derive(Debug, Clone)]
pub struct HttpMessageSource {
    client: reqwest::Client,
    base_url: String,
    keys: HashMap<String, String>,
}

impl HttpMessageSource {
    /// Build a client against `base_url` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be constructed.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        keys: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("agent-courier/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            keys: keys.into_iter().collect(),
        })
    }

    /// Build a client holding the reporter key and every mailbox key.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be constructed.
    pub fn from_config(config: &GlobalConfig) -> Result<Self> {
        let keys = std::iter::once((config.comms.agent_id.clone(), config.comms.api_key.clone()))
            .chain(
                config
                    .mailboxes
                    .iter()
                    .map(|m| (m.id.clone(), m.api_key.clone())),
            );
        Self::new(&config.comms.base_url, config.request_timeout(), keys)
    }

    fn request(&self, method: Method, path: &str, agent_id: &str) -> Result<RequestBuilder> {
        let key = self
            .keys
            .get(agent_id)
            .ok_or_else(|| AppError::Auth(format!("no credential for agent {agent_id}")))?;
        Ok(self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header(AGENT_ID_HEADER, agent_id)
            .header(AGENT_KEY_HEADER, key))
    }

    async fn execute(&self, request: RequestBuilder, what: &str) -> Result<Vec<u8>> {
        let response = request.send().await.map_err(|err| transport_error(what, &err))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| transport_error(what, &err))?;

        if status.is_success() {
            return Ok(body.to_vec());
        }

        let text = String::from_utf8_lossy(&body);
        let snippet: String = text.chars().take(200).collect();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                AppError::Auth(format!("{what} rejected with {status}"))
            }
            s if s.is_server_error() => {
                AppError::Transport(format!("{what} failed with {status}: {snippet}"))
            }
            _ => AppError::Protocol(format!("{what} failed with {status}: {snippet}")),
        })
    }

    async fn fetch_inbox(&self, mailbox_id: &str) -> Result<FetchedInbox> {
        let request = self.request(
            Method::GET,
            &format!("/inbox/{mailbox_id}?status=unread"),
            mailbox_id,
        )?;
        let body = self.execute(request, "inbox fetch").await?;
        let envelope: InboxResponse = serde_json::from_slice(&body)
            .map_err(|err| AppError::Protocol(format!("malformed inbox response: {err}")))?;

        let inbox = decode_records(envelope.messages);
        debug!(
            mailbox_id,
            unread = inbox.messages.len(),
            quarantined = inbox.quarantined.len(),
            "inbox fetched"
        );
        Ok(inbox)
    }

    async fn send_message(&self, agent_id: &str, message: &OutgoingMessage) -> Result<()> {
        let request = self.request(Method::POST, "/send", agent_id)?.json(message);
        self.execute(request, "send").await?;
        debug!(agent_id, to_agent = %message.to_agent, subject = %message.subject, "message sent");
        Ok(())
    }

    async fn mark_status(
        &self,
        agent_id: &str,
        message_id: &str,
        status: MessageStatus,
    ) -> Result<()> {
        let request = self
            .request(Method::PATCH, &format!("/{message_id}/status"), agent_id)?
            .json(&json!({ "status": status.as_str() }));
        self.execute(request, "status update").await?;
        Ok(())
    }
}

impl MessageSource for HttpMessageSource {
    fn fetch<'a>(&'a self, mailbox_id: &'a str) -> SourceFuture<'a, FetchedInbox> {
        Box::pin(self.fetch_inbox(mailbox_id))
    }

    fn send<'a>(&'a self, agent_id: &'a str, message: &'a OutgoingMessage) -> SourceFuture<'a, ()> {
        Box::pin(self.send_message(agent_id, message))
    }

    fn mark<'a>(
        &'a self,
        agent_id: &'a str,
        message_id: &'a str,
        status: MessageStatus,
    ) -> SourceFuture<'a, ()> {
        Box::pin(self.mark_status(agent_id, message_id, status))
    }
}

fn transport_error(what: &str, err: &reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::Timeout(format!("{what}: {err}"))
    } else if err.is_decode() {
        AppError::Protocol(format!("{what}: {err}"))
    } else {
        AppError::Transport(format!("{what}: {err}"))
    }
}

/// Decode raw inbox records one by one, keeping only unread messages.
#[must_use]
pub fn decode_records(records: Vec<Value>) -> FetchedInbox {
    let mut inbox = FetchedInbox::default();
    for record in records {
        let id = record.get("id").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        match serde_json::from_value::<Message>(record) {
            Ok(message) if message.status == MessageStatus::Unread => inbox.messages.push(message),
            Ok(_) => {}
            Err(err) => {
                warn!(id = ?id, %err, "quarantining malformed inbox record");
                inbox.quarantined.push(QuarantinedRecord {
                    id,
                    error: err.to_string(),
                });
            }
        }
    }
    inbox
}
