use {async_trait::async_trait, etm_common::ChatIdentifier, serde::Serialize};

use crate::{
    Error, Result,
    message::{SentMessage, SlaveChat, SlaveMessage},
};

/// Static description of a slave channel, shown by `/info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelDescriptor {
    /// Unique channel id, e.g. `"irc.demo"`.
    pub id: String,
    pub name: String,
    pub emoji: String,
    pub version: String,
}

/// A middleware registered with the coordinator. Only described, never called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MiddlewareDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
}

/// An additional feature a slave channel offers through `/extra`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtraFunction {
    /// Command name, `[a-z0-9_-]+`. Passed back to [`SlaveChannel::call_extra`].
    pub id: String,
    /// Human readable title.
    pub name: String,
    /// Usage text. `{function_name}` is replaced by the command to type.
    pub description: String,
}

impl ExtraFunction {
    /// Whether `id` can be typed as part of a Telegram command.
    #[must_use]
    pub fn is_valid_id(id: &str) -> bool {
        !id.is_empty()
            && id
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
    }
}

/// Capability contract every slave channel implements.
///
/// Messages from the slave toward Telegram do not go through this trait:
/// the slave pushes them into the coordinator's inbox instead.
#[async_trait]
pub trait SlaveChannel: Send + Sync {
    fn descriptor(&self) -> &ChannelDescriptor;

    /// Deliver a message from the Telegram user to one of this channel's chats.
    async fn send_message(&self, message: SlaveMessage) -> Result<SentMessage>;

    /// Chats currently known to the channel. Used to seed the chat cache.
    async fn chats(&self) -> Result<Vec<SlaveChat>> {
        Ok(Vec::new())
    }

    /// Additional features listed by `/extra`.
    fn extra_functions(&self) -> Vec<ExtraFunction> {
        Vec::new()
    }

    /// Run the extra function `id` with the free-form `args` typed after the
    /// command. Returns the text shown to the user.
    async fn call_extra(&self, id: &str, _args: &str) -> Result<String> {
        Err(Error::unsupported(&self.descriptor().id, format!("extra function {id}")))
    }

    /// Remove a message this channel delivered earlier.
    async fn remove_message(&self, _chat: &ChatIdentifier, _uid: &str) -> Result<()> {
        Err(Error::unsupported(&self.descriptor().id, "message removal"))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    struct Bare(ChannelDescriptor);

    #[async_trait]
    impl SlaveChannel for Bare {
        fn descriptor(&self) -> &ChannelDescriptor {
            &self.0
        }

        async fn send_message(&self, _message: SlaveMessage) -> Result<SentMessage> {
            Ok(SentMessage { uid: "1".into() })
        }
    }

    fn bare() -> Bare {
        Bare(ChannelDescriptor {
            id: "irc.demo".into(),
            name: "Demo".into(),
            emoji: "🔌".into(),
            version: "0.1".into(),
        })
    }

    #[tokio::test]
    async fn optional_capabilities_default_to_unsupported() {
        let channel = bare();
        assert!(channel.extra_functions().is_empty());

        let err = channel.call_extra("search", "rust").await.unwrap_err();
        assert!(matches!(err, Error::Unsupported { ref channel_id, .. } if channel_id == "irc.demo"));

        let chat: ChatIdentifier = "irc.demo#room1".parse().unwrap();
        let err = channel.remove_message(&chat, "7").await.unwrap_err();
        assert_eq!(err.to_string(), "irc.demo does not support message removal");
    }

    #[test]
    fn extra_function_ids_are_command_safe() {
        assert!(ExtraFunction::is_valid_id("search"));
        assert!(ExtraFunction::is_valid_id("list_rooms-2"));
        assert!(!ExtraFunction::is_valid_id(""));
        assert!(!ExtraFunction::is_valid_id("Search"));
        assert!(!ExtraFunction::is_valid_id("a b"));
    }
}
