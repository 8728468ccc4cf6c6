use etm_common::{ChatIdentifier, IdentifierError};

use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A Telegram chat with no usable link tried to send to a slave.
    #[error("{chat} is not linked to any remote chat")]
    UnboundChat { chat: ChatIdentifier },

    /// A Telegram chat linked to several remote chats sent a message without
    /// replying to one of their messages.
    #[error("{chat} is linked to {candidates} remote chats; reply to a message to pick one")]
    AmbiguousChat {
        chat: ChatIdentifier,
        candidates: usize,
    },

    /// Control command from a user who is not an administrator.
    #[error("user {user_id} is not an administrator")]
    PermissionDenied { user_id: i64 },

    #[error("session is {state}, expected {expected}")]
    InvalidState {
        state: &'static str,
        expected: &'static str,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Sending to a specific Telegram chat failed.
    #[error("delivery to telegram chat {chat_id} failed: {source}")]
    Delivery {
        chat_id: i64,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Bindings(#[from] etm_bindings::Error),

    #[error(transparent)]
    Channel(#[from] etm_channels::Error),

    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn delivery(chat_id: i64, source: TransportError) -> Self {
        Self::Delivery { chat_id, source }
    }

    /// The transport error behind this error, if any.
    #[must_use]
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(e) | Self::Delivery { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

impl etm_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

etm_common::impl_context!();
