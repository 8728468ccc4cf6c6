use etm_common::IdentifierError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Single-binding policy forbids a second slave chat on this Telegram chat.
    #[error("{master} is already linked to {existing}; unlink it first or replace the link")]
    PolicyViolation { master: String, existing: String },

    #[error("invalid chat pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("corrupt row in {table}: {message}")]
    CorruptRow { table: &'static str, message: String },

    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl Error {
    #[must_use]
    pub fn corrupt(table: &'static str, message: impl std::fmt::Display) -> Self {
        Self::CorruptRow {
            table,
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
