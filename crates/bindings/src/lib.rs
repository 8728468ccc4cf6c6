//! SQLite persistence for the Telegram master channel.
//!
//! Three tables live in `tgdata.db`: chat bindings, the message log that maps
//! Telegram messages to slave messages, and a cache of slave chat names.

pub mod binding_store;
pub mod chat_info;
pub mod error;
pub mod message_log;

pub use {
    binding_store::{Binding, BindingPolicy, BindingStore, LinkMode, SqliteBindingStore},
    chat_info::{ChatInfoStore, SqliteChatInfoStore},
    error::{Error, Result},
    message_log::{
        Direction, MessageLog, MsgLogEntry, SqliteMessageLog, master_msg_key, parse_master_msg_key,
    },
};

/// Run database migrations for this crate.
///
/// Creates the `bindings`, `msg_log`, and `slave_chat_info` tables. Must run
/// before any store is used.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
