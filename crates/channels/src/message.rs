use {
    etm_common::ChatIdentifier,
    serde::{Deserialize, Serialize},
};

/// Kind of a slave-side chat, which decides the Telegram header layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    User,
    Group,
    System,
}

impl ChatKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::System => "system",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "group" => Some(Self::Group),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    /// Member joined a chat. Slaves tend to emit these more than once.
    JoinNotification,
}

/// A chat known to a slave channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveChat {
    pub id: ChatIdentifier,
    pub name: String,
    pub alias: Option<String>,
    pub kind: ChatKind,
}

impl SlaveChat {
    /// Alias when set, otherwise the chat name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A message produced by a slave channel, travelling toward Telegram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMessage {
    /// Slave-local message id.
    pub uid: String,
    /// Chat of origin.
    pub chat: ChatIdentifier,
    pub chat_name: String,
    pub chat_kind: ChatKind,
    pub author_name: String,
    pub text: String,
    pub kind: MessageKind,
    /// Set when this replaces an earlier message with the same `uid`.
    pub edit: bool,
    /// Slave-local id of the message this one replies to.
    pub reply_to_uid: Option<String>,
}

impl RemoteMessage {
    #[must_use]
    pub fn text(
        chat: ChatIdentifier,
        uid: impl Into<String>,
        author: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            uid: uid.into(),
            chat_name: chat.chat_uid().to_string(),
            chat,
            chat_kind: ChatKind::Group,
            author_name: author.into(),
            text: text.into(),
            kind: MessageKind::Text,
            edit: false,
            reply_to_uid: None,
        }
    }

    /// Key identifying "the same event" for deduplication purposes.
    #[must_use]
    pub fn dedupe_key(&self) -> String {
        format!("{}|{}|{}", self.chat, self.author_name, self.text)
    }
}

/// A message from the Telegram user, addressed to one slave chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveMessage {
    /// Destination chat.
    pub chat: ChatIdentifier,
    pub text: String,
    /// Telegram user id of the author.
    pub author_id: i64,
    pub author_name: String,
    /// Slave-local id of the message being replied to.
    pub reply_to_uid: Option<String>,
    /// Slave-local id of the message being edited.
    pub edit_of: Option<String>,
}

/// Acknowledgement returned by a slave for a delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub uid: String,
}

/// Out-of-band status events from slave channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusUpdate {
    /// Chats added, renamed, or removed on the slave side.
    ChatUpdates {
        channel_id: String,
        upserted: Vec<SlaveChat>,
        removed: Vec<ChatIdentifier>,
    },
    /// A message was retracted on the slave side.
    MessageRemoval {
        chat: ChatIdentifier,
        message_uid: String,
    },
    /// Group membership changed.
    MemberUpdates {
        chat: ChatIdentifier,
        added: Vec<String>,
        removed: Vec<String>,
    },
}
