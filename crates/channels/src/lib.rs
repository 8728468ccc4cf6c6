//! Host coordinator model.
//!
//! Slave channels (other chat networks) implement [`SlaveChannel`] and are
//! registered with the [`Coordinator`], which also owns the inbox through
//! which they push events toward the Telegram master channel.

pub mod error;
pub mod inbox;
pub mod loopback;
pub mod message;
pub mod plugin;
pub mod registry;

pub use {
    error::{Error, Result},
    inbox::{Inbox, InboxSender, SlaveEvent},
    loopback::{LOOPBACK_CHANNEL_ID, LoopbackChannel},
    message::{
        ChatKind, MessageKind, RemoteMessage, SentMessage, SlaveChat, SlaveMessage, StatusUpdate,
    },
    plugin::{ChannelDescriptor, ExtraFunction, MiddlewareDescriptor, SlaveChannel},
    registry::{Coordinator, DEFAULT_INBOX_CAPACITY},
};
