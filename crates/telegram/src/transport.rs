//! Bot API port.
//!
//! Everything above this module talks to Telegram through [`Transport`], so
//! the session, router, and commands can be driven by an in-memory fake in
//! tests. [`crate::teloxide_transport`] is the production adapter.

use std::time::Duration;

use async_trait::async_trait;

/// Errors raised by the transport, already sorted into the classes the
/// session's error handler distinguishes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Another process is polling with the same token.
    #[error("conflict: terminated by another getUpdates request")]
    Conflict,

    /// Token rejected, or the bot was blocked/kicked by the recipient.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// An edit left the message unchanged.
    #[error("message is not modified")]
    NotModified,

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Timeout or connection failure. Worth retrying later.
    #[error("network error (timeout: {timeout}): {message}")]
    Network { timeout: bool, message: String },

    /// The group was upgraded and now lives under a new id.
    #[error("chat migrated to {new_chat_id}")]
    ChatMigrated { new_chat_id: i64 },

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    #[must_use]
    pub fn network(timeout: bool, message: impl Into<String>) -> Self {
        Self::Network {
            timeout,
            message: message.into(),
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelegramChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

/// The subset of a Telegram message the bridge cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramMessage {
    pub chat_id: i64,
    pub chat_kind: TelegramChatKind,
    pub chat_title: Option<String>,
    pub message_id: i32,
    pub sender_id: Option<i64>,
    pub sender_name: String,
    pub text: Option<String>,
    pub reply_to_message_id: Option<i32>,
    /// Set on the service message announcing a group upgrade.
    pub migrate_to_chat_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    Message(TelegramMessage),
    EditedMessage(TelegramMessage),
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundUpdate {
    pub update_id: u32,
    pub kind: UpdateKind,
}

impl InboundUpdate {
    /// The message carried by this update, if any.
    #[must_use]
    pub fn message(&self) -> Option<&TelegramMessage> {
        match &self.kind {
            UpdateKind::Message(m) | UpdateKind::EditedMessage(m) => Some(m),
            UpdateKind::Unsupported => None,
        }
    }
}

/// Address of a message that was sent or received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i32,
}

/// Text to send. `html` selects HTML parse mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub html: bool,
    pub reply_to: Option<i32>,
}

impl OutgoingMessage {
    #[must_use]
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            html: false,
            reply_to: None,
        }
    }

    #[must_use]
    pub fn html(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            html: true,
            reply_to: None,
        }
    }

    #[must_use]
    pub fn reply_to(mut self, message_id: i32) -> Self {
        self.reply_to = Some(message_id);
        self
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Long-poll for updates. Blocks until updates arrive or `timeout`
    /// elapses; an empty batch is not an error.
    async fn receive(&self, timeout: Duration) -> TransportResult<Vec<InboundUpdate>>;

    async fn send_message(
        &self,
        chat_id: i64,
        message: OutgoingMessage,
    ) -> TransportResult<MessageRef>;

    async fn edit_message(
        &self,
        target: MessageRef,
        message: OutgoingMessage,
    ) -> TransportResult<MessageRef>;

    async fn delete_message(&self, target: MessageRef) -> TransportResult<()>;
}
