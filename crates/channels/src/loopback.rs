//! A slave channel that echoes every message back to its sender.
//!
//! Handy for checking a deployment end to end: link a Telegram group to
//! `etm.loopback#echo` and everything written there comes straight back.

use std::sync::atomic::{AtomicU64, Ordering};

use {async_trait::async_trait, etm_common::ChatIdentifier, tracing::debug};

use crate::{
    Error, Result,
    inbox::InboxSender,
    message::{ChatKind, MessageKind, RemoteMessage, SentMessage, SlaveChat, SlaveMessage},
    plugin::{ChannelDescriptor, ExtraFunction, SlaveChannel},
};

pub const LOOPBACK_CHANNEL_ID: &str = "etm.loopback";
const ECHO_CHAT_UID: &str = "echo";
const STATS_FUNCTION: &str = "stats";

pub struct LoopbackChannel {
    descriptor: ChannelDescriptor,
    inbox: InboxSender,
    next_uid: AtomicU64,
    echoed: AtomicU64,
}

impl LoopbackChannel {
    #[must_use]
    pub fn new(inbox: InboxSender) -> Self {
        Self {
            descriptor: ChannelDescriptor {
                id: LOOPBACK_CHANNEL_ID.into(),
                name: "Loopback".into(),
                emoji: "🔁".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
            inbox,
            next_uid: AtomicU64::new(1),
            echoed: AtomicU64::new(0),
        }
    }

    /// The single chat this channel exposes.
    pub fn echo_chat() -> Result<ChatIdentifier> {
        Ok(ChatIdentifier::new(LOOPBACK_CHANNEL_ID, ECHO_CHAT_UID)?)
    }

    fn allocate_uid(&self) -> String {
        self.next_uid.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

#[async_trait]
impl SlaveChannel for LoopbackChannel {
    fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    async fn send_message(&self, message: SlaveMessage) -> Result<SentMessage> {
        let received_uid = message
            .edit_of
            .clone()
            .unwrap_or_else(|| self.allocate_uid());
        debug!(chat = %message.chat, uid = %received_uid, "loopback received message");

        let echo = RemoteMessage {
            uid: self.allocate_uid(),
            chat: message.chat.clone(),
            chat_name: message.chat.chat_uid().to_string(),
            chat_kind: ChatKind::User,
            author_name: "loopback".into(),
            text: message.text,
            kind: MessageKind::Text,
            edit: false,
            reply_to_uid: Some(received_uid.clone()),
        };
        self.inbox.message(echo).await?;
        self.echoed.fetch_add(1, Ordering::Relaxed);
        Ok(SentMessage { uid: received_uid })
    }

    async fn chats(&self) -> Result<Vec<SlaveChat>> {
        Ok(vec![SlaveChat {
            id: Self::echo_chat()?,
            name: "Echo".into(),
            alias: None,
            kind: ChatKind::User,
        }])
    }

    fn extra_functions(&self) -> Vec<ExtraFunction> {
        vec![ExtraFunction {
            id: STATS_FUNCTION.into(),
            name: "Statistics".into(),
            description: "Show how many messages were echoed.\nUsage: {function_name}".into(),
        }]
    }

    async fn call_extra(&self, id: &str, _args: &str) -> Result<String> {
        if id != STATS_FUNCTION {
            return Err(Error::unsupported(LOOPBACK_CHANNEL_ID, format!("extra function {id}")));
        }
        Ok(format!(
            "Echoed {} message(s).",
            self.echoed.load(Ordering::Relaxed)
        ))
    }

    /// Echoes are not kept, so there is nothing to take back.
    async fn remove_message(&self, chat: &ChatIdentifier, uid: &str) -> Result<()> {
        debug!(%chat, uid, "loopback message removed");
        Ok(())
    }
}
