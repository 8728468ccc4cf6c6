//! Dispatch of Telegram updates: commands to the control surface, everything
//! else to the router.

use std::sync::Arc;

use {
    async_trait::async_trait,
    etm_common::ChatIdentifier,
    tracing::{debug, warn},
};

use crate::{
    commands::{Command, ControlSurface, parse_command},
    error::{Error, Result},
    router::{DeliveryResult, Router},
    session::UpdateHandler,
    transport::{
        InboundUpdate, OutgoingMessage, TelegramMessage, Transport, TransportError, UpdateKind,
    },
};

const NOT_ADMIN_REPLY: &str = "Only administrators of this bridge can use this command.";
const UNBOUND_REPLY: &str = "This chat is not linked to any remote chat. \
                             Use /link to link one, or reply to a bridged message.";

/// Handles every update the session polls.
///
/// Only administrators are bridged: messages from anyone else in a linked
/// group are ignored.
pub struct MasterHandler {
    transport: Arc<dyn Transport>,
    router: Arc<Router>,
    control: Arc<ControlSurface>,
    admins: Vec<i64>,
    bot_username: Option<String>,
}

impl MasterHandler {
    pub fn new(
        transport: Arc<dyn Transport>,
        router: Arc<Router>,
        control: Arc<ControlSurface>,
        admins: Vec<i64>,
        bot_username: Option<String>,
    ) -> Self {
        Self {
            transport,
            router,
            control,
            admins,
            bot_username,
        }
    }

    async fn reply(&self, message: &TelegramMessage, text: impl Into<String>) -> Result<()> {
        let reply = OutgoingMessage::plain(text).reply_to(message.message_id);
        self.transport
            .send_message(message.chat_id, reply)
            .await
            .map_err(|e| Error::delivery(message.chat_id, e))?;
        Ok(())
    }

    async fn handle_message(&self, message: &TelegramMessage, edit: bool) -> Result<()> {
        if let Some(new_chat_id) = message.migrate_to_chat_id {
            return Err(TransportError::ChatMigrated { new_chat_id }.into());
        }

        if !edit
            && let Some(text) = &message.text
            && let Some(command) = parse_command(text, self.bot_username.as_deref())
        {
            return self.handle_command(message, command).await;
        }

        let Some(sender) = message.sender_id.filter(|id| self.admins.contains(id)) else {
            debug!(chat_id = message.chat_id, "ignoring message from non-admin");
            return Ok(());
        };

        match self.router.route_outbound(message, edit).await {
            Ok(DeliveryResult::Delivered(_) | DeliveryResult::Removed(_)) => Ok(()),
            Ok(DeliveryResult::Dropped(reason)) => {
                debug!(chat_id = message.chat_id, sender, ?reason, "telegram message not forwarded");
                Ok(())
            },
            Err(Error::UnboundChat { .. }) => self.reply(message, UNBOUND_REPLY).await,
            Err(
                e @ (Error::AmbiguousChat { .. }
                | Error::Channel(etm_channels::Error::Unsupported { .. })),
            ) => self.reply(message, e.to_string()).await,
            Err(e) => Err(e),
        }
    }

    async fn handle_command(
        &self,
        message: &TelegramMessage,
        command: Command,
    ) -> Result<()> {
        let Some(caller) = message.sender_id else {
            return Ok(());
        };
        let master = ChatIdentifier::telegram(message.chat_id);
        debug!(chat_id = message.chat_id, caller, ?command, "control command");

        match self.control.execute(caller, &master, command).await {
            Ok(outcome) => self.reply(message, outcome.summary).await,
            Err(Error::PermissionDenied { user_id }) => {
                warn!(user_id, chat_id = message.chat_id, "refused control command");
                self.reply(message, NOT_ADMIN_REPLY).await
            },
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl UpdateHandler for MasterHandler {
    async fn handle(&self, update: InboundUpdate) -> Result<()> {
        match &update.kind {
            UpdateKind::Message(message) => self.handle_message(message, false).await,
            UpdateKind::EditedMessage(message) => self.handle_message(message, true).await,
            UpdateKind::Unsupported => {
                debug!(update_id = update.update_id, "ignoring unsupported update");
                Ok(())
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            config::MasterConfig,
            testing::{ADMIN, FakeSlave, FakeTransport, Stores, stores, tg_message, update},
        },
        etm_bindings::{BindingPolicy, BindingStore, ChatInfoStore, LinkMode, MessageLog},
        etm_channels::{Coordinator, SlaveChannel},
        etm_config::Flags,
    };

    const GROUP: i64 = -100;
    const MEMBER: i64 = 77;

    struct Fixture {
        handler: MasterHandler,
        transport: Arc<FakeTransport>,
        slave: Arc<FakeSlave>,
        stores: Stores,
    }

    async fn fixture() -> Fixture {
        let transport = FakeTransport::new();
        let slave = FakeSlave::new("irc.demo");
        let (mut coordinator, _inbox) = Coordinator::new(4);
        coordinator.register(Arc::clone(&slave) as Arc<dyn SlaveChannel>);
        let coordinator = Arc::new(coordinator);
        let stores = stores(BindingPolicy::Multiple).await;
        let config = MasterConfig::from_flags(vec![ADMIN], &Flags::default());
        let router = Router::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&coordinator),
            Arc::clone(&stores.bindings) as Arc<dyn BindingStore>,
            Arc::clone(&stores.msg_log) as Arc<dyn MessageLog>,
            Arc::clone(&stores.chat_info) as Arc<dyn ChatInfoStore>,
            config.clone(),
        );
        let control = ControlSurface::new(
            Arc::clone(&stores.bindings) as Arc<dyn BindingStore>,
            Arc::clone(&stores.chat_info) as Arc<dyn ChatInfoStore>,
            coordinator,
            config.admins.clone(),
        );
        let handler = MasterHandler::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::new(router),
            Arc::new(control),
            config.admins,
            Some("etm_bot".into()),
        );
        Fixture {
            handler,
            transport,
            slave,
            stores,
        }
    }

    #[tokio::test]
    async fn link_command_then_message_is_forwarded() {
        let f = fixture().await;
        f.handler
            .handle(update(1, tg_message(GROUP, 1, ADMIN, "/link@etm_bot irc.demo#room1")))
            .await
            .unwrap();
        let reply = &f.transport.sent_to(GROUP)[0];
        assert!(reply.text.starts_with("Linked"));
        assert_eq!(reply.reply_to, Some(1));

        f.handler
            .handle(update(2, tg_message(GROUP, 2, ADMIN, "hello")))
            .await
            .unwrap();
        assert_eq!(f.slave.received().len(), 1);
    }

    #[tokio::test]
    async fn non_admin_command_gets_refusal() {
        let f = fixture().await;
        f.handler
            .handle(update(1, tg_message(GROUP, 1, MEMBER, "/link irc.demo#room1")))
            .await
            .unwrap();
        assert_eq!(f.transport.sent_to(GROUP)[0].text, NOT_ADMIN_REPLY);
        assert!(f.stores.bindings.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_admin_messages_are_ignored() {
        let f = fixture().await;
        f.stores
            .bindings
            .link(
                &ChatIdentifier::telegram(GROUP),
                &"irc.demo#room1".parse().unwrap(),
                LinkMode::Strict,
            )
            .await
            .unwrap();
        f.handler
            .handle(update(1, tg_message(GROUP, 1, MEMBER, "hi")))
            .await
            .unwrap();
        assert!(f.slave.received().is_empty());
        assert_eq!(f.transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn unbound_chat_gets_hint() {
        let f = fixture().await;
        f.handler
            .handle(update(1, tg_message(GROUP, 5, ADMIN, "anyone?")))
            .await
            .unwrap();
        let sent = f.transport.sent_to(GROUP);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, UNBOUND_REPLY);
    }

    #[tokio::test]
    async fn migration_service_message_surfaces_as_error() {
        let f = fixture().await;
        let mut service = tg_message(GROUP, 9, ADMIN, "");
        service.migrate_to_chat_id = Some(-1009);
        let err = f.handler.handle(update(1, service)).await.unwrap_err();
        assert!(matches!(
            err.transport(),
            Some(TransportError::ChatMigrated { new_chat_id: -1009 })
        ));
    }

    #[tokio::test]
    async fn commands_for_other_bots_are_bridged_as_text() {
        let f = fixture().await;
        f.stores
            .bindings
            .link(
                &ChatIdentifier::telegram(GROUP),
                &"irc.demo#room1".parse().unwrap(),
                LinkMode::Strict,
            )
            .await
            .unwrap();
        f.handler
            .handle(update(1, tg_message(GROUP, 1, ADMIN, "/info@other_bot")))
            .await
            .unwrap();
        assert_eq!(f.slave.received()[0].text, "/info@other_bot");
    }

    #[tokio::test]
    async fn extra_call_replies_with_result() {
        let f = fixture().await;
        f.handler
            .handle(update(1, tg_message(GROUP, 1, ADMIN, "/0_search@etm_bot borrow checker")))
            .await
            .unwrap();
        let reply = &f.transport.sent_to(GROUP)[0];
        assert!(reply.text.ends_with("results for \"borrow checker\""), "{}", reply.text);
        assert_eq!(reply.reply_to, Some(1));
        assert!(f.slave.received().is_empty());
    }

    async fn linked_with_forwarded_message(f: &Fixture) -> TelegramMessage {
        f.stores
            .bindings
            .link(
                &ChatIdentifier::telegram(GROUP),
                &"irc.demo#room1".parse().unwrap(),
                LinkMode::Strict,
            )
            .await
            .unwrap();
        let original = tg_message(GROUP, 3, ADMIN, "wrong chat");
        f.handler.handle(update(1, original.clone())).await.unwrap();
        TelegramMessage {
            text: Some("rm`".into()),
            ..original
        }
    }

    #[tokio::test]
    async fn edit_to_remove_prefix_takes_back_remote_copy() {
        let f = fixture().await;
        let edited = linked_with_forwarded_message(&f).await;

        f.handler
            .handle(InboundUpdate {
                update_id: 2,
                kind: UpdateKind::EditedMessage(edited),
            })
            .await
            .unwrap();

        assert_eq!(f.slave.removed().len(), 1);
        assert_eq!(f.slave.received().len(), 1);
        assert_eq!(f.transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn refused_removal_is_explained() {
        let f = fixture().await;
        f.slave
            .refuse_removal
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let edited = linked_with_forwarded_message(&f).await;

        f.handler
            .handle(InboundUpdate {
                update_id: 2,
                kind: UpdateKind::EditedMessage(edited),
            })
            .await
            .unwrap();

        let reply = &f.transport.sent_to(GROUP)[0];
        assert_eq!(reply.text, "irc.demo does not support message removal");
        assert_eq!(reply.reply_to, Some(3));
    }

    #[tokio::test]
    async fn unsupported_updates_are_ignored() {
        let f = fixture().await;
        f.handler
            .handle(InboundUpdate {
                update_id: 1,
                kind: UpdateKind::Unsupported,
            })
            .await
            .unwrap();
        assert_eq!(f.transport.sent_count(), 0);
    }
}
