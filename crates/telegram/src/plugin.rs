use std::sync::Arc;

use {
    etm_bindings::{
        BindingStore, ChatInfoStore, MessageLog, SqliteBindingStore, SqliteChatInfoStore,
        SqliteMessageLog,
    },
    etm_channels::{Coordinator, Inbox, SlaveEvent},
    sqlx::SqlitePool,
    tokio::{sync::Mutex, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::{
    commands::ControlSurface,
    config::MasterConfig,
    error::Result,
    handlers::MasterHandler,
    router::Router,
    session::{BotSession, ErrorHandler, ErrorOrigin, SessionState},
    transport::Transport,
};

/// The three stores the master channel persists to.
#[derive(Clone)]
pub struct MasterStores {
    pub bindings: Arc<dyn BindingStore>,
    pub msg_log: Arc<dyn MessageLog>,
    pub chat_info: Arc<dyn ChatInfoStore>,
}

impl MasterStores {
    /// SQLite stores sharing one pool. Migrations must already have run.
    pub fn sqlite(pool: SqlitePool, config: &MasterConfig) -> Self {
        Self {
            bindings: Arc::new(SqliteBindingStore::new(pool.clone(), config.policy)),
            msg_log: Arc::new(SqliteMessageLog::new(pool.clone())),
            chat_info: Arc::new(SqliteChatInfoStore::new(pool)),
        }
    }
}

struct InboxDrain {
    cancel: CancellationToken,
    task: JoinHandle<Inbox>,
}

/// Telegram master channel: the polling session plus the task that drains
/// slave events into Telegram.
pub struct TelegramMaster {
    session: BotSession,
    router: Arc<Router>,
    errors: Arc<ErrorHandler>,
    chat_info: Arc<dyn ChatInfoStore>,
    inbox: Mutex<Option<Inbox>>,
    drain: Mutex<Option<InboxDrain>>,
}

impl TelegramMaster {
    pub fn new(
        transport: Arc<dyn Transport>,
        bot_username: Option<String>,
        coordinator: Coordinator,
        inbox: Inbox,
        stores: MasterStores,
        config: MasterConfig,
    ) -> Self {
        let coordinator = Arc::new(coordinator);
        let router = Arc::new(Router::new(
            Arc::clone(&transport),
            Arc::clone(&coordinator),
            Arc::clone(&stores.bindings),
            Arc::clone(&stores.msg_log),
            Arc::clone(&stores.chat_info),
            config.clone(),
        ));
        let control = Arc::new(ControlSurface::new(
            Arc::clone(&stores.bindings),
            Arc::clone(&stores.chat_info),
            coordinator,
            config.admins.clone(),
        ));
        let errors = Arc::new(ErrorHandler::new(
            Arc::clone(&transport),
            Arc::clone(&stores.bindings),
            &config,
        ));
        let handler = Arc::new(MasterHandler::new(
            Arc::clone(&transport),
            Arc::clone(&router),
            control,
            config.admins.clone(),
            bot_username,
        ));
        let session = BotSession::new(transport, handler, Arc::clone(&errors), config);

        Self {
            session,
            router,
            errors,
            chat_info: stores.chat_info,
            inbox: Mutex::new(Some(inbox)),
            drain: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Transient network errors since startup.
    pub fn network_error_count(&self) -> u64 {
        self.errors.network_error_count()
    }

    /// Seed the chat cache from every slave, then start polling Telegram and
    /// draining the slave inbox.
    pub async fn start(&self) -> Result<()> {
        self.seed_chat_info().await;
        self.session.start().await?;

        let mut drain = self.drain.lock().await;
        if drain.is_none()
            && let Some(inbox) = self.inbox.lock().await.take()
        {
            let cancel = CancellationToken::new();
            let task = tokio::spawn(drain_inbox(
                inbox,
                Arc::clone(&self.router),
                Arc::clone(&self.errors),
                cancel.clone(),
            ));
            *drain = Some(InboxDrain { cancel, task });
        }
        info!("telegram master channel started");
        Ok(())
    }

    /// Stop polling, then stop draining the inbox. Returns once the update
    /// and the slave event being handled have finished.
    pub async fn stop(&self) {
        self.session.stop().await;

        let Some(InboxDrain { cancel, task }) = self.drain.lock().await.take() else {
            return;
        };
        cancel.cancel();
        match task.await {
            Ok(inbox) => *self.inbox.lock().await = Some(inbox),
            Err(e) => warn!(error = %e, "inbox drain task ended abnormally"),
        }
        info!("telegram master channel stopped");
    }

    async fn seed_chat_info(&self) {
        for slave in self.router.coordinator().slave_channels() {
            let channel_id = &slave.descriptor().id;
            let chats = match slave.chats().await {
                Ok(chats) => chats,
                Err(e) => {
                    warn!(channel_id, error = %e, "could not list slave chats");
                    continue;
                },
            };
            for chat in &chats {
                if let Err(e) = self.chat_info.upsert(chat).await {
                    warn!(channel_id, chat = %chat.id, error = %e, "could not cache slave chat");
                }
            }
            info!(channel_id, chats = chats.len(), "slave chats cached");
        }
    }
}

async fn drain_inbox(
    mut inbox: Inbox,
    router: Arc<Router>,
    errors: Arc<ErrorHandler>,
    cancel: CancellationToken,
) -> Inbox {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = inbox.next() => event,
        };
        let Some(event) = event else {
            info!("every slave dropped its inbox sender");
            break;
        };

        let result = match event {
            SlaveEvent::Message(message) => router.route_inbound(message).await.map(drop),
            SlaveEvent::Status(update) => router.handle_status(update).await,
        };
        if let Err(e) = result {
            errors.handle(&e, ErrorOrigin::Background).await;
        }
    }
    inbox
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testing::{ADMIN, FakeTransport, pool, tg_message, update},
        etm_bindings::LinkMode,
        etm_channels::{LoopbackChannel, SlaveChannel},
        etm_common::ChatIdentifier,
        etm_config::Flags,
        std::time::Duration,
    };

    const GROUP: i64 = -100;

    async fn master(transport: &Arc<FakeTransport>) -> (TelegramMaster, MasterStores) {
        let mut config = MasterConfig::from_flags(vec![ADMIN], &Flags::default());
        config.poll_timeout = Duration::from_millis(10);
        config.error_backoff = Duration::ZERO;
        let stores = MasterStores::sqlite(pool().await, &config);
        let (mut coordinator, inbox) = Coordinator::new(8);
        let loopback = LoopbackChannel::new(coordinator.inbox_sender());
        coordinator.register(Arc::new(loopback) as Arc<dyn SlaveChannel>);
        let master = TelegramMaster::new(
            Arc::clone(transport) as Arc<dyn Transport>,
            Some("etm_bot".into()),
            coordinator,
            inbox,
            stores.clone(),
            config,
        );
        (master, stores)
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn start_seeds_chat_info_and_stop_is_clean() {
        let transport = FakeTransport::new();
        let (master, stores) = master(&transport).await;

        master.start().await.unwrap();
        assert_eq!(master.state(), SessionState::Polling);
        let echo = LoopbackChannel::echo_chat().unwrap();
        assert_eq!(stores.chat_info.get(&echo).await.unwrap().unwrap().name, "Echo");

        master.stop().await;
        assert_eq!(master.state(), SessionState::Stopped);
        assert_eq!(master.network_error_count(), 0);
        master.stop().await;

        master.start().await.unwrap();
        master.stop().await;
    }

    #[tokio::test]
    async fn telegram_message_round_trips_through_loopback() {
        let transport = FakeTransport::new();
        let (master, stores) = master(&transport).await;
        stores
            .bindings
            .link(
                &ChatIdentifier::telegram(GROUP),
                &LoopbackChannel::echo_chat().unwrap(),
                LinkMode::Strict,
            )
            .await
            .unwrap();
        transport.push_receive(Ok(vec![update(1, tg_message(GROUP, 10, ADMIN, "ping"))]));

        master.start().await.unwrap();
        eventually(|| !transport.sent_to(GROUP).is_empty()).await;
        master.stop().await;

        let echoed = transport.sent_to(GROUP);
        assert_eq!(echoed.len(), 1);
        assert!(echoed[0].text.ends_with("\nping"));
    }
}
