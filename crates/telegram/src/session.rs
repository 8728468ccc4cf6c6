//! Bot session: the polling loop and what happens when something fails.
//!
//! The session fetches one batch of updates at a time and hands each update
//! to an [`UpdateHandler`] before looking at the next. Every error, whether
//! from polling or from handling, goes through [`ErrorHandler::handle`],
//! which classifies it and reacts (notify the admin, reply to the user,
//! migrate bindings). Nothing short of [`BotSession::stop`] ends the loop.

use std::sync::{Arc, RwLock};

use {
    async_trait::async_trait,
    etm_bindings::BindingStore,
    etm_common::ChatIdentifier,
    tokio::{sync::Mutex, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    config::MasterConfig,
    counter::NetworkErrorCounter,
    error::{Error, Result},
    html::escape_html,
    transport::{InboundUpdate, OutgoingMessage, TelegramMessage, Transport, TransportError},
};

/// Consumer of polled updates.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    async fn handle(&self, update: InboundUpdate) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Polling,
    Stopping,
}

impl SessionState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Polling => "polling",
            Self::Stopping => "stopping",
        }
    }
}

/// How an error was classified, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    Conflict,
    Unauthorized,
    NotModified,
    BadRequest(String),
    Transient,
    ChatMigrated { new_chat_id: i64 },
    Other,
}

impl ErrorClass {
    #[must_use]
    pub fn of(error: &Error) -> Self {
        match error.transport() {
            Some(TransportError::Conflict) => Self::Conflict,
            Some(TransportError::Unauthorized(_)) => Self::Unauthorized,
            Some(TransportError::NotModified) => Self::NotModified,
            Some(TransportError::BadRequest(message)) => Self::BadRequest(message.clone()),
            Some(TransportError::Network { .. }) => Self::Transient,
            Some(TransportError::ChatMigrated { new_chat_id }) => Self::ChatMigrated {
                new_chat_id: *new_chat_id,
            },
            Some(TransportError::Other(_)) | None => Self::Other,
        }
    }
}

/// Where an error came from.
#[derive(Debug, Clone, Copy, Default)]
pub enum ErrorOrigin<'a> {
    /// The poll itself, or background work with no Telegram message.
    #[default]
    Background,
    /// Handling this Telegram message.
    Update(&'a TelegramMessage),
}

const CONFLICT_NOTICE: &str = "Conflicted polling detected. If this error persists, make sure \
                               only one instance of this bridge is running with this bot token.";
const POOR_NETWORK_REPLY: &str = "This message was not processed due to a poor network \
                                  connection on the server. Please try again later.";

/// Classifies errors and carries out the reaction for each class.
pub struct ErrorHandler {
    transport: Arc<dyn Transport>,
    bindings: Arc<dyn BindingStore>,
    admin: Option<i64>,
    prompt_interval: u64,
    network_errors: NetworkErrorCounter,
}

impl ErrorHandler {
    pub fn new(
        transport: Arc<dyn Transport>,
        bindings: Arc<dyn BindingStore>,
        config: &MasterConfig,
    ) -> Self {
        Self {
            transport,
            bindings,
            admin: config.primary_admin(),
            prompt_interval: config.network_error_prompt_interval,
            network_errors: NetworkErrorCounter::default(),
        }
    }

    /// Transient network errors since startup.
    pub fn network_error_count(&self) -> u64 {
        self.network_errors.get()
    }

    /// React to `error`. Never fails: problems while reacting are logged.
    pub async fn handle(&self, error: &Error, origin: ErrorOrigin<'_>) -> ErrorClass {
        let class = ErrorClass::of(error);
        let message = match origin {
            ErrorOrigin::Update(m) => Some(m),
            ErrorOrigin::Background => None,
        };

        match &class {
            ErrorClass::Conflict => {
                error!(critical = true, error = %error, "another instance is polling this bot");
                self.notify_admin(CONFLICT_NOTICE.to_string()).await;
            },
            ErrorClass::Unauthorized => {
                error!(error = %error, "telegram rejected the request as unauthorized");
            },
            ErrorClass::NotModified => {
                debug!(error = %error, "edit left message unchanged");
            },
            ErrorClass::BadRequest(reason) => {
                error!(error = %error, "telegram rejected the request");
                self.notify_admin(format!(
                    "Bad request: {}\n\nUpdate: <code>{}</code>",
                    escape_html(reason),
                    escape_html(&describe(message)),
                ))
                .await;
            },
            ErrorClass::Transient => {
                let count = self.network_errors.increment();
                warn!(count, error = %error, "transient network error");
                if let Some(m) = message {
                    let reply = OutgoingMessage::plain(POOR_NETWORK_REPLY).reply_to(m.message_id);
                    if let Err(e) = self.transport.send_message(m.chat_id, reply).await {
                        debug!(chat_id = m.chat_id, error = %e, "failed to tell user about network error");
                    }
                }
                if NetworkErrorCounter::should_notify(count, self.prompt_interval) {
                    self.notify_admin(format!(
                        "<b>Telegram master channel</b>\nThe server may have a poor network \
                         connection: {count} network errors since startup."
                    ))
                    .await;
                }
            },
            ErrorClass::ChatMigrated { new_chat_id } => {
                self.migrate(error, message, *new_chat_id).await;
            },
            ErrorClass::Other => {
                error!(error = %error, "error while processing update");
                self.notify_admin(format!(
                    "Error while processing an update: {}\n\nUpdate: <code>{}</code>",
                    escape_html(&error.to_string()),
                    escape_html(&describe(message)),
                ))
                .await;
            },
        }
        class
    }

    async fn migrate(&self, error: &Error, message: Option<&TelegramMessage>, new_chat_id: i64) {
        let old_chat_id = match error {
            Error::Delivery { chat_id, .. } => Some(*chat_id),
            _ => message.map(|m| m.chat_id),
        };
        let Some(old_chat_id) = old_chat_id else {
            warn!(new_chat_id, "chat migrated but the old chat id is unknown");
            return;
        };

        let old = ChatIdentifier::telegram(old_chat_id);
        let new = ChatIdentifier::telegram(new_chat_id);
        match self.bindings.migrate(&old, &new).await {
            Ok(moved) => {
                info!(old_chat_id, new_chat_id, moved, "chat migrated");
                let notice = OutgoingMessage::plain(format!(
                    "Chat migration detected. {moved} remote chat(s) are now linked to this group."
                ));
                if let Err(e) = self.transport.send_message(new_chat_id, notice).await {
                    warn!(new_chat_id, error = %e, "failed to confirm chat migration");
                }
            },
            Err(e) => {
                error!(old_chat_id, new_chat_id, error = %e, "failed to migrate bindings");
                self.notify_admin(format!(
                    "Failed to migrate links from {old_chat_id} to {new_chat_id}: {}",
                    escape_html(&e.to_string())
                ))
                .await;
            },
        }
    }

    async fn notify_admin(&self, text: String) {
        let Some(admin) = self.admin else {
            warn!("no administrator configured for notices");
            return;
        };
        if let Err(e) = self
            .transport
            .send_message(admin, OutgoingMessage::html(text))
            .await
        {
            error!(admin, error = %e, "failed to notify administrator");
        }
    }
}

fn describe(message: Option<&TelegramMessage>) -> String {
    match message {
        Some(m) => format!(
            "chat {} message {} from {}: {}",
            m.chat_id,
            m.message_id,
            m.sender_name,
            m.text.as_deref().unwrap_or("<no text>")
        ),
        None => "none".to_string(),
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Polling lifecycle: `stopped -> polling -> stopping -> stopped`.
pub struct BotSession {
    transport: Arc<dyn Transport>,
    handler: Arc<dyn UpdateHandler>,
    errors: Arc<ErrorHandler>,
    config: MasterConfig,
    state: Arc<RwLock<SessionState>>,
    running: Mutex<Option<Running>>,
}

impl BotSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        handler: Arc<dyn UpdateHandler>,
        errors: Arc<ErrorHandler>,
        config: MasterConfig,
    ) -> Self {
        Self {
            transport,
            handler,
            errors,
            config,
            state: Arc::new(RwLock::new(SessionState::Stopped)),
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
        debug!(state = state.as_str(), "session state changed");
    }

    pub fn error_handler(&self) -> Arc<ErrorHandler> {
        Arc::clone(&self.errors)
    }

    /// Begin polling in a background task.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(Error::InvalidState {
                state: self.state().as_str(),
                expected: SessionState::Stopped.as_str(),
            });
        }

        let cancel = CancellationToken::new();
        let poll = PollLoop {
            transport: Arc::clone(&self.transport),
            handler: Arc::clone(&self.handler),
            errors: Arc::clone(&self.errors),
            config: self.config.clone(),
            cancel: cancel.clone(),
        };
        self.set_state(SessionState::Polling);
        let task = tokio::spawn(poll.run());
        *running = Some(Running { cancel, task });
        Ok(())
    }

    /// Stop polling and wait for the update being handled to finish.
    /// A no-op when already stopped.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(Running { cancel, task }) = running.take() else {
            return;
        };

        self.set_state(SessionState::Stopping);
        cancel.cancel();
        if let Err(e) = task.await {
            error!(error = %e, "polling task ended abnormally");
        }
        self.set_state(SessionState::Stopped);
    }
}

struct PollLoop {
    transport: Arc<dyn Transport>,
    handler: Arc<dyn UpdateHandler>,
    errors: Arc<ErrorHandler>,
    config: MasterConfig,
    cancel: CancellationToken,
}

impl PollLoop {
    async fn run(self) {
        info!("starting telegram polling loop");

        loop {
            let polled = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                polled = self.transport.receive(self.config.poll_timeout) => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        // Unhandled updates stay unconfirmed on Telegram's side
                        // and are redelivered after a restart.
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        self.dispatch(update).await;
                    }
                },
                Err(e) => {
                    self.errors
                        .handle(&Error::Transport(e), ErrorOrigin::Background)
                        .await;
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(self.config.error_backoff) => {},
                    }
                },
            }
        }

        info!("telegram polling stopped");
    }

    async fn dispatch(&self, update: InboundUpdate) {
        let update_id = update.update_id;
        let message = update.message().cloned();
        debug!(update_id, "dispatching update");

        // Handler panics are reported like errors. Release builds abort on
        // panic, so there the guard never fires.
        let handler = Arc::clone(&self.handler);
        let outcome = tokio::spawn(async move { handler.handle(update).await })
            .await
            .unwrap_or_else(|join| {
                Err(Error::message(format!(
                    "handler for update {update_id} failed: {join}"
                )))
            });
        if let Err(e) = outcome {
            let origin = message.as_ref().map_or(ErrorOrigin::Background, ErrorOrigin::Update);
            self.errors.handle(&e, origin).await;
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testing::{ADMIN, FakeTransport, stores, tg_message, update},
        etm_bindings::{BindingPolicy, LinkMode},
        etm_config::Flags,
        std::{
            sync::{
                Mutex as StdMutex,
                atomic::{AtomicBool, Ordering},
            },
            time::Duration,
        },
    };

    fn config(prompt_interval: u64) -> MasterConfig {
        let mut config = MasterConfig::from_flags(vec![ADMIN, 2000], &Flags::default());
        config.network_error_prompt_interval = prompt_interval;
        config.poll_timeout = Duration::from_millis(10);
        config.error_backoff = Duration::ZERO;
        config
    }

    fn id(s: &str) -> ChatIdentifier {
        s.parse().unwrap()
    }

    async fn error_handler(
        transport: &Arc<FakeTransport>,
        prompt_interval: u64,
    ) -> (ErrorHandler, Arc<dyn BindingStore>) {
        let bindings: Arc<dyn BindingStore> = stores(BindingPolicy::Multiple).await.bindings;
        let handler = ErrorHandler::new(
            Arc::clone(transport) as Arc<dyn Transport>,
            Arc::clone(&bindings),
            &config(prompt_interval),
        );
        (handler, bindings)
    }

    fn network() -> Error {
        Error::Transport(TransportError::network(true, "timed out"))
    }

    #[tokio::test]
    async fn every_nth_transient_error_notifies_admin_once() {
        let transport = FakeTransport::new();
        let (errors, _) = error_handler(&transport, 5).await;

        for _ in 0..5 {
            assert_eq!(
                errors.handle(&network(), ErrorOrigin::Background).await,
                ErrorClass::Transient
            );
        }

        assert_eq!(errors.network_error_count(), 5);
        let notices = transport.sent_to(ADMIN);
        assert_eq!(notices.len(), 1);
        assert!(notices[0].text.contains("5 network errors"));
    }

    #[tokio::test]
    async fn zero_interval_never_notifies() {
        let transport = FakeTransport::new();
        let (errors, _) = error_handler(&transport, 0).await;
        for _ in 0..10 {
            errors.handle(&network(), ErrorOrigin::Background).await;
        }
        assert_eq!(errors.network_error_count(), 10);
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn transient_error_replies_to_user() {
        let transport = FakeTransport::new();
        let (errors, _) = error_handler(&transport, 100).await;
        let msg = tg_message(-100, 42, 7, "hello");

        errors.handle(&network(), ErrorOrigin::Update(&msg)).await;

        let replies = transport.sent_to(-100);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].reply_to, Some(42));
        assert!(transport.sent_to(ADMIN).is_empty());
    }

    #[tokio::test]
    async fn chat_migration_moves_bindings_and_confirms() {
        let transport = FakeTransport::new();
        let (errors, bindings) = error_handler(&transport, 100).await;
        let old = ChatIdentifier::telegram(-100);
        for room in ["irc.demo#a", "irc.demo#b"] {
            bindings.link(&old, &id(room), LinkMode::Strict).await.unwrap();
        }
        let msg = tg_message(-100, 1, 7, "");
        let err = Error::Transport(TransportError::ChatMigrated {
            new_chat_id: -1009999,
        });

        let class = errors.handle(&err, ErrorOrigin::Update(&msg)).await;

        assert_eq!(class, ErrorClass::ChatMigrated {
            new_chat_id: -1009999
        });
        assert!(bindings.lookup_by_master(&old).await.unwrap().is_empty());
        let moved = bindings
            .lookup_by_master(&ChatIdentifier::telegram(-1009999))
            .await
            .unwrap();
        assert_eq!(moved.len(), 2);
        let confirmations = transport.sent_to(-1009999);
        assert_eq!(confirmations.len(), 1);
        assert!(confirmations[0].text.contains('2'));
    }

    #[tokio::test]
    async fn delivery_failure_migration_uses_failed_chat() {
        let transport = FakeTransport::new();
        let (errors, bindings) = error_handler(&transport, 100).await;
        let old = ChatIdentifier::telegram(-5);
        bindings.link(&old, &id("irc.demo#a"), LinkMode::Strict).await.unwrap();

        let err = Error::delivery(-5, TransportError::ChatMigrated { new_chat_id: -1005 });
        errors.handle(&err, ErrorOrigin::Background).await;

        assert_eq!(
            bindings
                .lookup_by_master(&ChatIdentifier::telegram(-1005))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn classification_follows_priority() {
        let transport = FakeTransport::new();
        let (errors, _) = error_handler(&transport, 100).await;

        let cases = [
            (TransportError::Conflict, ErrorClass::Conflict, 1),
            (TransportError::Unauthorized("blocked".into()), ErrorClass::Unauthorized, 0),
            (TransportError::NotModified, ErrorClass::NotModified, 0),
            (
                TransportError::BadRequest("chat not found".into()),
                ErrorClass::BadRequest("chat not found".into()),
                1,
            ),
        ];
        for (err, expected, notices) in cases {
            let before = transport.sent_to(ADMIN).len();
            let class = errors
                .handle(&Error::Transport(err), ErrorOrigin::Background)
                .await;
            assert_eq!(class, expected);
            assert_eq!(transport.sent_to(ADMIN).len() - before, notices);
        }
        assert_eq!(errors.network_error_count(), 0);
    }

    #[tokio::test]
    async fn bad_request_notice_is_escaped() {
        let transport = FakeTransport::new();
        let (errors, _) = error_handler(&transport, 100).await;
        let msg = tg_message(-1, 1, 7, "<script>");
        errors
            .handle(
                &Error::Transport(TransportError::BadRequest("<bad>".into())),
                ErrorOrigin::Update(&msg),
            )
            .await;
        let notice = &transport.sent_to(ADMIN)[0];
        assert!(notice.html);
        assert!(notice.text.contains("&lt;bad&gt;"));
        assert!(notice.text.contains("&lt;script&gt;"));
    }

    #[tokio::test]
    async fn failed_notification_is_swallowed() {
        let transport = FakeTransport::new();
        let (errors, _) = error_handler(&transport, 100).await;
        transport.fail_all_sends();

        let class = errors
            .handle(&Error::message("boom"), ErrorOrigin::Background)
            .await;
        assert_eq!(class, ErrorClass::Other);
        assert_eq!(transport.sent_count(), 0);
    }

    struct Recording {
        seen: StdMutex<Vec<u32>>,
        fail_on: Option<u32>,
    }

    #[async_trait]
    impl UpdateHandler for Recording {
        async fn handle(&self, update: InboundUpdate) -> Result<()> {
            self.seen.lock().unwrap().push(update.update_id);
            if self.fail_on == Some(update.update_id) {
                return Err(Error::message("handler failed"));
            }
            Ok(())
        }
    }

    async fn session_with(
        transport: &Arc<FakeTransport>,
        handler: Arc<dyn UpdateHandler>,
        prompt_interval: u64,
    ) -> BotSession {
        let (errors, _) = error_handler(transport, prompt_interval).await;
        BotSession::new(
            Arc::clone(transport) as Arc<dyn Transport>,
            handler,
            Arc::new(errors),
            config(prompt_interval),
        )
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let transport = FakeTransport::new();
        let handler = Arc::new(Recording {
            seen: StdMutex::new(Vec::new()),
            fail_on: None,
        });
        let session = session_with(&transport, handler, 100).await;

        assert_eq!(session.state(), SessionState::Stopped);
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Polling);
        assert!(matches!(
            session.start().await,
            Err(Error::InvalidState { .. })
        ));

        session.stop().await;
        assert_eq!(session.state(), SessionState::Stopped);
        session.stop().await;
        assert_eq!(session.state(), SessionState::Stopped);

        session.start().await.unwrap();
        session.stop().await;
    }

    #[tokio::test]
    async fn dispatches_in_order_and_survives_handler_errors() {
        let transport = FakeTransport::new();
        transport.push_receive(Ok(vec![
            update(1, tg_message(-1, 1, 7, "a")),
            update(2, tg_message(-1, 2, 7, "b")),
        ]));
        transport.push_receive(Ok(vec![update(3, tg_message(-1, 3, 7, "c"))]));
        let handler = Arc::new(Recording {
            seen: StdMutex::new(Vec::new()),
            fail_on: Some(2),
        });
        let session = session_with(&transport, Arc::clone(&handler) as _, 100).await;

        session.start().await.unwrap();
        transport.wait_idle().await;
        session.stop().await;

        assert_eq!(*handler.seen.lock().unwrap(), vec![1, 2, 3]);
        // The handler failure was reported to the admin.
        assert_eq!(transport.sent_to(ADMIN).len(), 1);
    }

    struct Panicking {
        seen: StdMutex<Vec<u32>>,
    }

    #[async_trait]
    impl UpdateHandler for Panicking {
        async fn handle(&self, update: InboundUpdate) -> Result<()> {
            assert_ne!(update.update_id, 2, "cannot handle update 2");
            self.seen.lock().unwrap().push(update.update_id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn handler_panic_is_reported_and_polling_continues() {
        let transport = FakeTransport::new();
        transport.push_receive(Ok(vec![
            update(1, tg_message(-1, 1, 7, "a")),
            update(2, tg_message(-1, 2, 7, "b")),
        ]));
        transport.push_receive(Ok(vec![update(3, tg_message(-1, 3, 7, "c"))]));
        let handler = Arc::new(Panicking {
            seen: StdMutex::new(Vec::new()),
        });
        let session = session_with(&transport, Arc::clone(&handler) as _, 100).await;

        session.start().await.unwrap();
        transport.wait_idle().await;
        session.stop().await;

        assert_eq!(*handler.seen.lock().unwrap(), vec![1, 3]);
        let reports = transport.sent_to(ADMIN);
        assert_eq!(reports.len(), 1);
        assert!(reports[0].text.contains("update 2"), "{}", reports[0].text);
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn polling_errors_are_counted_and_loop_continues() {
        let transport = FakeTransport::new();
        for _ in 0..5 {
            transport.push_receive(Err(TransportError::network(true, "timed out")));
        }
        transport.push_receive(Ok(vec![update(9, tg_message(-1, 1, 7, "after"))]));
        let handler = Arc::new(Recording {
            seen: StdMutex::new(Vec::new()),
            fail_on: None,
        });
        let session = session_with(&transport, Arc::clone(&handler) as _, 5).await;

        session.start().await.unwrap();
        transport.wait_idle().await;
        session.stop().await;

        assert_eq!(session.error_handler().network_error_count(), 5);
        assert_eq!(transport.sent_to(ADMIN).len(), 1);
        assert_eq!(*handler.seen.lock().unwrap(), vec![9]);
    }

    struct Slow {
        finished: AtomicBool,
        started: tokio::sync::Notify,
    }

    #[async_trait]
    impl UpdateHandler for Slow {
        async fn handle(&self, _update: InboundUpdate) -> Result<()> {
            self.started.notify_one();
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_update() {
        let transport = FakeTransport::new();
        transport.push_receive(Ok(vec![
            update(1, tg_message(-1, 1, 7, "slow")),
            update(2, tg_message(-1, 2, 7, "never")),
        ]));
        let handler = Arc::new(Slow {
            finished: AtomicBool::new(false),
            started: tokio::sync::Notify::new(),
        });
        let session = session_with(&transport, Arc::clone(&handler) as _, 100).await;

        session.start().await.unwrap();
        handler.started.notified().await;
        session.stop().await;

        assert!(handler.finished.load(Ordering::SeqCst));
        assert_eq!(session.state(), SessionState::Stopped);
    }
}
