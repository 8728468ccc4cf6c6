//! In-memory fakes of the transport and of a slave channel.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    etm_bindings::{BindingPolicy, SqliteBindingStore, SqliteChatInfoStore, SqliteMessageLog},
    etm_channels::{
        ChannelDescriptor, Error as ChannelError, ExtraFunction, Result as ChannelResult,
        SentMessage, SlaveChannel, SlaveMessage,
    },
    etm_common::ChatIdentifier,
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
    tokio::sync::Notify,
};

use crate::transport::{
    InboundUpdate, MessageRef, OutgoingMessage, TelegramChatKind, TelegramMessage, Transport,
    TransportError, TransportResult, UpdateKind,
};

pub const ADMIN: i64 = 1000;

/// Scripted transport that records everything sent through it.
#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<VecDeque<TransportResult<Vec<InboundUpdate>>>>,
    send_failures: Mutex<VecDeque<TransportError>>,
    fail_all_sends: AtomicBool,
    fail_deletes: AtomicBool,
    pub sent: Mutex<Vec<(i64, OutgoingMessage)>>,
    pub edited: Mutex<Vec<(MessageRef, OutgoingMessage)>>,
    pub deleted: Mutex<Vec<MessageRef>>,
    next_message_id: AtomicI32,
    idle: Notify,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_message_id: AtomicI32::new(500),
            ..Self::default()
        })
    }

    pub fn push_receive(&self, result: TransportResult<Vec<InboundUpdate>>) {
        self.script.lock().unwrap().push_back(result);
    }

    /// Make the next send fail with `error`.
    pub fn fail_next_send(&self, error: TransportError) {
        self.send_failures.lock().unwrap().push_back(error);
    }

    pub fn fail_all_sends(&self) {
        self.fail_all_sends.store(true, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }

    /// Resolves once the session asks for updates after the script ran out,
    /// i.e. every scripted batch has been fully handled.
    pub async fn wait_idle(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.idle.notified())
            .await
            .expect("session never drained the receive script");
    }

    pub fn sent_to(&self, chat_id: i64) -> Vec<OutgoingMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(chat, _)| *chat == chat_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn receive(&self, timeout: Duration) -> TransportResult<Vec<InboundUpdate>> {
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => {
                self.idle.notify_one();
                tokio::time::sleep(timeout).await;
                Ok(Vec::new())
            },
        }
    }

    async fn send_message(
        &self,
        chat_id: i64,
        message: OutgoingMessage,
    ) -> TransportResult<MessageRef> {
        if self.fail_all_sends.load(Ordering::SeqCst) {
            return Err(TransportError::network(false, "send disabled"));
        }
        if let Some(err) = self.send_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.sent.lock().unwrap().push((chat_id, message));
        Ok(MessageRef {
            chat_id,
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
        })
    }

    async fn edit_message(
        &self,
        target: MessageRef,
        message: OutgoingMessage,
    ) -> TransportResult<MessageRef> {
        self.edited.lock().unwrap().push((target, message));
        Ok(target)
    }

    async fn delete_message(&self, target: MessageRef) -> TransportResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(TransportError::BadRequest("message can't be deleted".into()));
        }
        self.deleted.lock().unwrap().push(target);
        Ok(())
    }
}

/// Slave channel that records what it is asked to deliver.
pub struct FakeSlave {
    descriptor: ChannelDescriptor,
    pub received: Mutex<Vec<SlaveMessage>>,
    pub removed: Mutex<Vec<(ChatIdentifier, String)>>,
    pub refuse_removal: AtomicBool,
    next_uid: AtomicU64,
}

impl FakeSlave {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            descriptor: ChannelDescriptor {
                id: id.into(),
                name: "Demo IRC".into(),
                emoji: "🔌".into(),
                version: "1.2.3".into(),
            },
            received: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            refuse_removal: AtomicBool::new(false),
            next_uid: AtomicU64::new(1),
        })
    }

    pub fn received(&self) -> Vec<SlaveMessage> {
        self.received.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<(ChatIdentifier, String)> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SlaveChannel for FakeSlave {
    fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    async fn send_message(&self, message: SlaveMessage) -> ChannelResult<SentMessage> {
        self.received.lock().unwrap().push(message);
        Ok(SentMessage {
            uid: format!("s{}", self.next_uid.fetch_add(1, Ordering::SeqCst)),
        })
    }

    /// One function, `search`, that echoes its arguments.
    fn extra_functions(&self) -> Vec<ExtraFunction> {
        vec![ExtraFunction {
            id: "search".into(),
            name: "Search".into(),
            description: "Usage: {function_name} <keywords>".into(),
        }]
    }

    async fn call_extra(&self, id: &str, args: &str) -> ChannelResult<String> {
        match id {
            "search" => Ok(format!("results for {args:?}")),
            other => Err(ChannelError::unsupported(&self.descriptor.id, other)),
        }
    }

    async fn remove_message(&self, chat: &ChatIdentifier, uid: &str) -> ChannelResult<()> {
        if self.refuse_removal.load(Ordering::SeqCst) {
            return Err(ChannelError::unsupported(&self.descriptor.id, "message removal"));
        }
        self.removed.lock().unwrap().push((chat.clone(), uid.to_string()));
        Ok(())
    }
}

pub async fn pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    etm_bindings::run_migrations(&pool).await.unwrap();
    pool
}

pub struct Stores {
    pub bindings: Arc<SqliteBindingStore>,
    pub msg_log: Arc<SqliteMessageLog>,
    pub chat_info: Arc<SqliteChatInfoStore>,
}

pub async fn stores(policy: BindingPolicy) -> Stores {
    let pool = pool().await;
    Stores {
        bindings: Arc::new(SqliteBindingStore::new(pool.clone(), policy)),
        msg_log: Arc::new(SqliteMessageLog::new(pool.clone())),
        chat_info: Arc::new(SqliteChatInfoStore::new(pool)),
    }
}

pub fn tg_message(chat_id: i64, message_id: i32, sender_id: i64, text: &str) -> TelegramMessage {
    TelegramMessage {
        chat_id,
        chat_kind: if chat_id > 0 {
            TelegramChatKind::Private
        } else {
            TelegramChatKind::Supergroup
        },
        chat_title: None,
        message_id,
        sender_id: Some(sender_id),
        sender_name: format!("user{sender_id}"),
        text: Some(text.to_string()),
        reply_to_message_id: None,
        migrate_to_chat_id: None,
    }
}

pub fn update(update_id: u32, message: TelegramMessage) -> InboundUpdate {
    InboundUpdate {
        update_id,
        kind: UpdateKind::Message(message),
    }
}
