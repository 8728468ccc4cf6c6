//! Message routing in both directions.
//!
//! Inbound: a slave message is mirrored into the Telegram chat its origin is
//! linked to. Outbound: a Telegram message goes to the remote chat its
//! Telegram chat is linked to, or to the origin of the message it replies to.
//! Both directions record a message log entry so later replies, edits and
//! removals can find their counterpart.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};

use {
    etm_bindings::{
        Binding, BindingStore, ChatInfoStore, Direction, MessageLog, MsgLogEntry, master_msg_key,
    },
    etm_channels::{Coordinator, MessageKind, RemoteMessage, SlaveMessage, StatusUpdate},
    etm_common::{ChatIdentifier, time::now_ms},
    tracing::{debug, info, warn},
};

use crate::{
    config::MasterConfig,
    dedupe::DedupeWindow,
    error::{Error, Result},
    html::{header, render},
    tracker::{DeliveryStatus, MessageTracker},
    transport::{MessageRef, OutgoingMessage, TelegramMessage, Transport},
};

/// Why a message was not delivered. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The origin chat is not linked to any Telegram chat.
    Unbound,
    /// A duplicate of an event seen within the dedupe window.
    Duplicate,
    /// The same message is already being delivered.
    InFlight,
    /// An edit of a message that was never bridged.
    Untracked,
    /// Nothing the bridge can forward, such as a message without text.
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered(Vec<ChatIdentifier>),
    /// A bridged message was taken back in the remote chat.
    Removed(ChatIdentifier),
    Dropped(DropReason),
}

impl DeliveryResult {
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }
}

const REMOVAL_NOTICE: &str = "This message was removed in the remote chat.";

/// Editing a bridged Telegram message to start with this removes it remotely.
pub const REMOVE_PREFIX: &str = "rm`";

pub struct Router {
    transport: Arc<dyn Transport>,
    coordinator: Arc<Coordinator>,
    bindings: Arc<dyn BindingStore>,
    msg_log: Arc<dyn MessageLog>,
    chat_info: Arc<dyn ChatInfoStore>,
    config: MasterConfig,
    dedupe: Mutex<DedupeWindow>,
    tracker: Mutex<MessageTracker>,
}

impl Router {
    pub fn new(
        transport: Arc<dyn Transport>,
        coordinator: Arc<Coordinator>,
        bindings: Arc<dyn BindingStore>,
        msg_log: Arc<dyn MessageLog>,
        chat_info: Arc<dyn ChatInfoStore>,
        config: MasterConfig,
    ) -> Self {
        Self {
            dedupe: Mutex::new(DedupeWindow::new(config.join_msg_threshold)),
            tracker: Mutex::new(MessageTracker::new(config.message_retention)),
            transport,
            coordinator,
            bindings,
            msg_log,
            chat_info,
            config,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Delivery status of an inbound message still being tracked.
    pub fn tracked_status(&self, message: &RemoteMessage) -> Option<DeliveryStatus> {
        self.tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status(&tracking_key(message))
    }

    /// Mirror a slave message into Telegram.
    pub async fn route_inbound(&self, message: RemoteMessage) -> Result<DeliveryResult> {
        let key = tracking_key(&message);
        let fresh = self
            .tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .begin_at(&key, Instant::now());
        if !fresh {
            debug!(chat = %message.chat, uid = %message.uid, "message already in flight");
            return Ok(DeliveryResult::Dropped(DropReason::InFlight));
        }

        let result = self.deliver_inbound(&message).await;
        let status = if result.is_ok() {
            DeliveryStatus::Sent
        } else {
            DeliveryStatus::Failed
        };
        self.tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish_at(&key, status, Instant::now());
        result
    }

    async fn deliver_inbound(&self, message: &RemoteMessage) -> Result<DeliveryResult> {
        if message.kind == MessageKind::JoinNotification {
            let seen = self
                .dedupe
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_at(&message.dedupe_key(), Instant::now());
            if seen {
                debug!(chat = %message.chat, "suppressed duplicate join notification");
                return Ok(DeliveryResult::Dropped(DropReason::Duplicate));
            }
        }

        let target = match self.bindings.lookup_by_slave(&message.chat).await? {
            Some(binding) => binding.master_uid,
            None => match self.config.primary_admin() {
                Some(admin) if self.config.deliver_unbound_to_admin => {
                    ChatIdentifier::telegram(admin)
                },
                _ => {
                    debug!(chat = %message.chat, "dropping message from unlinked chat");
                    return Ok(DeliveryResult::Dropped(DropReason::Unbound));
                },
            },
        };
        let chat_id = target.telegram_chat_id()?;

        let emoji = self
            .coordinator
            .get(message.chat.channel_id())
            .map(|slave| slave.descriptor().emoji.clone())
            .unwrap_or_default();
        let chat_name = match self.chat_info.get(&message.chat).await? {
            Some(info) => info.display_name().to_string(),
            None => message.chat_name.clone(),
        };
        let text = render(
            &header(&emoji, message.chat_kind, &chat_name, &message.author_name),
            &message.text,
        );

        let existing = if message.edit {
            self.find_master_copy(&message.uid, &message.chat, chat_id)
                .await?
        } else {
            None
        };

        let sent = match existing {
            Some(target_ref) => self
                .transport
                .edit_message(target_ref, OutgoingMessage::html(text))
                .await
                .map_err(|e| Error::delivery(chat_id, e))?,
            None => {
                let mut outgoing = OutgoingMessage::html(text);
                if let Some(reply_uid) = &message.reply_to_uid
                    && let Some(quoted) = self
                        .find_master_copy(reply_uid, &message.chat, chat_id)
                        .await?
                {
                    outgoing = outgoing.reply_to(quoted.message_id);
                }
                self.transport
                    .send_message(chat_id, outgoing)
                    .await
                    .map_err(|e| Error::delivery(chat_id, e))?
            },
        };

        if message.kind == MessageKind::JoinNotification {
            self.dedupe
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record_at(&message.dedupe_key(), Instant::now());
        }

        self.msg_log
            .record(MsgLogEntry {
                master_msg_id: master_msg_key(sent.chat_id, sent.message_id),
                slave_message_id: message.uid.clone(),
                slave_origin_uid: message.chat.clone(),
                text: message.text.clone(),
                sent_to: Direction::ToMaster,
                created_at: now_ms(),
            })
            .await?;

        debug!(chat = %message.chat, chat_id, message_id = sent.message_id, "delivered to telegram");
        Ok(DeliveryResult::Delivered(vec![target]))
    }

    /// Most recent Telegram copy of a slave message inside `chat_id`.
    async fn find_master_copy(
        &self,
        slave_message_id: &str,
        origin: &ChatIdentifier,
        chat_id: i64,
    ) -> Result<Option<MessageRef>> {
        let entries = self.msg_log.by_slave(slave_message_id, origin).await?;
        Ok(entries
            .iter()
            .filter_map(MsgLogEntry::master_ids)
            .find(|(chat, _)| *chat == chat_id)
            .map(|(chat_id, message_id)| MessageRef {
                chat_id,
                message_id,
            }))
    }

    /// Deliver a Telegram message to the remote chat it is addressed to.
    ///
    /// An edit whose text starts with [`REMOVE_PREFIX`] removes the bridged
    /// copy instead of editing it.
    pub async fn route_outbound(
        &self,
        message: &TelegramMessage,
        edit: bool,
    ) -> Result<DeliveryResult> {
        let Some(text) = message.text.clone() else {
            return Ok(DeliveryResult::Dropped(DropReason::Unsupported));
        };

        let master = ChatIdentifier::telegram(message.chat_id);
        let bindings = self.bindings.lookup_by_master(&master).await?;
        let quoted = match message.reply_to_message_id {
            Some(reply_id) => {
                self.msg_log
                    .by_master(&master_msg_key(message.chat_id, reply_id))
                    .await?
            },
            None => None,
        };
        let target = resolve_destination(&master, &bindings, quoted.as_ref())?;

        let edit_of = if edit {
            match self
                .msg_log
                .by_master(&master_msg_key(message.chat_id, message.message_id))
                .await?
            {
                Some(entry) if entry.slave_origin_uid == target => Some(entry.slave_message_id),
                _ => {
                    debug!(chat_id = message.chat_id, message_id = message.message_id, "edit of untracked message");
                    return Ok(DeliveryResult::Dropped(DropReason::Untracked));
                },
            }
        } else {
            None
        };
        let reply_to_uid = quoted
            .filter(|entry| entry.slave_origin_uid == target)
            .map(|entry| entry.slave_message_id);

        let slave = self.coordinator.require(target.channel_id())?;
        if let Some(uid) = &edit_of
            && text.starts_with(REMOVE_PREFIX)
        {
            slave.remove_message(&target, uid).await?;
            self.msg_log
                .remove(&master_msg_key(message.chat_id, message.message_id))
                .await?;
            debug!(chat_id = message.chat_id, slave = %target, %uid, "removed remote copy");
            return Ok(DeliveryResult::Removed(target));
        }

        let sent = slave
            .send_message(SlaveMessage {
                chat: target.clone(),
                text: text.clone(),
                author_id: message.sender_id.unwrap_or(message.chat_id),
                author_name: message.sender_name.clone(),
                reply_to_uid,
                edit_of,
            })
            .await?;

        self.msg_log
            .record(MsgLogEntry {
                master_msg_id: master_msg_key(message.chat_id, message.message_id),
                slave_message_id: sent.uid,
                slave_origin_uid: target.clone(),
                text,
                sent_to: Direction::ToSlave,
                created_at: now_ms(),
            })
            .await?;

        debug!(chat_id = message.chat_id, slave = %target, "delivered to remote chat");
        Ok(DeliveryResult::Delivered(vec![target]))
    }

    /// Apply a status event pushed by a slave.
    pub async fn handle_status(&self, update: StatusUpdate) -> Result<()> {
        match update {
            StatusUpdate::ChatUpdates {
                channel_id,
                upserted,
                removed,
            } => {
                for chat in &upserted {
                    self.chat_info.upsert(chat).await?;
                }
                for chat in &removed {
                    self.chat_info.remove(chat).await?;
                }
                info!(
                    channel_id,
                    upserted = upserted.len(),
                    removed = removed.len(),
                    "slave chat list updated"
                );
            },
            StatusUpdate::MessageRemoval { chat, message_uid } => {
                self.remove_master_copies(&chat, &message_uid).await?;
            },
            StatusUpdate::MemberUpdates {
                chat,
                added,
                removed,
            } => {
                debug!(%chat, added = added.len(), removed = removed.len(), "member update ignored");
            },
        }
        Ok(())
    }

    async fn remove_master_copies(&self, chat: &ChatIdentifier, message_uid: &str) -> Result<()> {
        let entries = self.msg_log.by_slave(message_uid, chat).await?;
        for target in entries.iter().filter_map(MsgLogEntry::master_ids) {
            let target = MessageRef {
                chat_id: target.0,
                message_id: target.1,
            };
            if !self.config.prevent_message_removal {
                match self.transport.delete_message(target).await {
                    Ok(()) => {
                        debug!(chat_id = target.chat_id, message_id = target.message_id, "deleted removed message");
                        continue;
                    },
                    Err(e) => {
                        warn!(chat_id = target.chat_id, error = %e, "could not delete removed message");
                    },
                }
            }
            let notice = OutgoingMessage::plain(REMOVAL_NOTICE).reply_to(target.message_id);
            self.transport
                .send_message(target.chat_id, notice)
                .await
                .map_err(|e| Error::delivery(target.chat_id, e))?;
        }
        Ok(())
    }
}

fn tracking_key(message: &RemoteMessage) -> String {
    let suffix = if message.edit { "/edit" } else { "" };
    format!("{}/{}{suffix}", message.chat, message.uid)
}

/// Pick the remote chat a Telegram message is meant for.
///
/// A reply to a bridged message goes to that message's origin when the
/// origin is one of the chat's links, or when the chat has no links at all
/// (a private chat with the bot). Otherwise a chat with exactly one link
/// sends there.
fn resolve_destination(
    master: &ChatIdentifier,
    bindings: &[Binding],
    quoted: Option<&MsgLogEntry>,
) -> Result<ChatIdentifier> {
    if let Some(entry) = quoted {
        let origin = &entry.slave_origin_uid;
        if bindings.is_empty() || bindings.iter().any(|b| &b.slave_uid == origin) {
            return Ok(origin.clone());
        }
    }
    match bindings {
        [] => Err(Error::UnboundChat {
            chat: master.clone(),
        }),
        [only] => Ok(only.slave_uid.clone()),
        many => Err(Error::AmbiguousChat {
            chat: master.clone(),
            candidates: many.len(),
        }),
    }
}
