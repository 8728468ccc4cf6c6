use std::time::Duration;

use {
    etm_bindings::BindingPolicy,
    etm_config::{EtmConfig, Flags},
};

/// Runtime settings of the master channel, derived from [`EtmConfig`].
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Never empty; the first entry receives admin notices.
    pub admins: Vec<i64>,
    pub policy: BindingPolicy,
    pub network_error_prompt_interval: u64,
    pub join_msg_threshold: Duration,
    pub message_retention: Duration,
    pub prevent_message_removal: bool,
    pub deliver_unbound_to_admin: bool,
    pub poll_timeout: Duration,
    /// Pause after a failed poll before polling again.
    pub error_backoff: Duration,
}

impl MasterConfig {
    #[must_use]
    pub fn from_flags(admins: Vec<i64>, flags: &Flags) -> Self {
        Self {
            admins,
            policy: BindingPolicy::from_flag(flags.multiple_slave_chats),
            network_error_prompt_interval: flags.network_error_prompt_interval,
            join_msg_threshold: Duration::from_secs(flags.join_msg_threshold_secs),
            message_retention: Duration::from_secs(flags.message_retention_secs),
            prevent_message_removal: flags.prevent_message_removal,
            deliver_unbound_to_admin: flags.deliver_unbound_to_admin,
            poll_timeout: Duration::from_secs(flags.poll_timeout_secs),
            error_backoff: Duration::from_secs(5),
        }
    }

    pub fn primary_admin(&self) -> Option<i64> {
        self.admins.first().copied()
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admins.contains(&user_id)
    }
}

impl From<&EtmConfig> for MasterConfig {
    fn from(config: &EtmConfig) -> Self {
        Self::from_flags(config.admins.clone(), &config.flags)
    }
}
