//! Message source contract: fetch unread mail, send messages, update status.
//!
//! The HTTP implementation lives in [`client`]. Tests and alternative
//! transports implement [`MessageSource`] directly.

pub mod client;

use std::future::Future;
use std::pin::Pin;

use crate::models::message::{Message, MessageStatus, OutgoingMessage};
use crate::Result;

pub use client::HttpMessageSource;

/// An inbox record that could not be decoded into a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantinedRecord {
    /// Identity, when the record carried a readable one.
    pub id: Option<String>,
    /// Decode failure.
    pub error: String,
}

/// Result of one inbox fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedInbox {
    /// Decoded unread messages, in endpoint order.
    pub messages: Vec<Message>,
    /// Records set aside at the boundary.
    pub quarantined: Vec<QuarantinedRecord>,
}

/// Boxed future returned by [`MessageSource`] operations.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Authenticated request/response channel over per-agent mailboxes.
///
/// Every operation is issued on behalf of `agent_id`, whose credentials the
/// implementation holds.
pub trait MessageSource: Send + Sync {
    /// Fetch unread messages addressed to `mailbox_id`.
    ///
    /// # Errors
    ///
    /// `AppError::Transport`, `AppError::Auth`, `AppError::Protocol`, or
    /// `AppError::Timeout`.
    fn fetch<'a>(&'a self, mailbox_id: &'a str) -> SourceFuture<'a, FetchedInbox>;

    /// Send `message` as `agent_id`.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`MessageSource::fetch`].
    fn send<'a>(&'a self, agent_id: &'a str, message: &'a OutgoingMessage) -> SourceFuture<'a, ()>;

    /// Set the status of `message_id` as `agent_id`.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`MessageSource::fetch`].
    fn mark<'a>(
        &'a self,
        agent_id: &'a str,
        message_id: &'a str,
        status: MessageStatus,
    ) -> SourceFuture<'a, ()>;
}
