//! Validated configuration types.
//!
//! [`EtmConfig`] is never deserialized directly: the loader parses the file
//! into a generic value, [`crate::validate`] checks it, and only then is the
//! typed config built. That keeps the lenient `admins` forms and unknown-flag
//! warnings in one place.

use std::path::PathBuf;

use {
    secrecy::Secret,
    serde::{Deserialize, Serialize},
};

/// Top-level configuration of the Telegram master channel.
#[derive(Debug, Clone)]
pub struct EtmConfig {
    /// Bot API token.
    pub token: Secret<String>,
    /// Telegram user ids allowed to run control commands. Never empty.
    pub admins: Vec<i64>,
    pub flags: Flags,
    /// Where `tgdata.db` lives. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
}

impl EtmConfig {
    /// First configured administrator, the target of all admin notices.
    #[must_use]
    pub fn primary_admin(&self) -> i64 {
        // `admins` is validated non-empty.
        self.admins.first().copied().unwrap_or_default()
    }

    #[must_use]
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admins.contains(&user_id)
    }
}

/// Behaviour switches. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Flags {
    /// Allow a Telegram group to be linked to more than one slave chat.
    pub multiple_slave_chats: bool,
    /// Notify the admin on every Nth transient network error. `0` disables.
    pub network_error_prompt_interval: u64,
    /// Duplicate join notifications within this window are suppressed.
    pub join_msg_threshold_secs: u64,
    pub message_retention_secs: u64,
    /// Reply with a notice instead of deleting when a slave removes a message.
    pub prevent_message_removal: bool,
    /// Send messages from unlinked slave chats to the first admin instead of
    /// dropping them.
    pub deliver_unbound_to_admin: bool,
    pub poll_timeout_secs: u64,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            multiple_slave_chats: true,
            network_error_prompt_interval: 100,
            join_msg_threshold_secs: 10,
            message_retention_secs: 300,
            prevent_message_removal: true,
            deliver_unbound_to_admin: false,
            poll_timeout_secs: 30,
        }
    }
}

impl Flags {
    pub const KNOWN_KEYS: &'static [&'static str] = &[
        "multiple_slave_chats",
        "network_error_prompt_interval",
        "join_msg_threshold_secs",
        "message_retention_secs",
        "prevent_message_removal",
        "deliver_unbound_to_admin",
        "poll_timeout_secs",
    ];
}
