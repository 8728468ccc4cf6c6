use etm_common::IdentifierError;

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors of the coordinator and of slave channels.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No slave channel with this id is registered.
    #[error("unknown slave channel: {channel_id}")]
    UnknownChannel { channel_id: String },

    /// The channel does not offer this optional capability.
    #[error("{channel_id} does not support {operation}")]
    Unsupported {
        channel_id: String,
        operation: String,
    },

    /// The master side stopped draining the inbox.
    #[error("slave inbox is closed")]
    InboxClosed,

    #[error(transparent)]
    Identifier(#[from] IdentifierError),
}

impl Error {
    #[must_use]
    pub fn unknown_channel(channel_id: impl std::fmt::Display) -> Self {
        Self::UnknownChannel {
            channel_id: channel_id.to_string(),
        }
    }

    #[must_use]
    pub fn unsupported(channel_id: impl std::fmt::Display, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            channel_id: channel_id.to_string(),
            operation: operation.into(),
        }
    }
}
