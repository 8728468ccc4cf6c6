//! [`Transport`] over the Telegram Bot API via teloxide.

use std::{
    future::Future,
    sync::atomic::{AtomicI32, Ordering},
    time::Duration,
};

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    teloxide::{
        ApiError, RequestError,
        payloads::{EditMessageTextSetters, GetUpdatesSetters, SendMessageSetters},
        prelude::*,
        types::{
            AllowedUpdate, BotCommand, ChatKind, MessageId, ParseMode, PublicChatKind,
            ReplyParameters, UpdateKind as TgUpdateKind,
        },
    },
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    transport::{
        InboundUpdate, MessageRef, OutgoingMessage, TelegramChatKind, TelegramMessage, Transport,
        TransportError, TransportResult, UpdateKind,
    },
};

const RETRY_AFTER_MAX_RETRIES: usize = 4;

/// Extra time the HTTP client waits beyond the long-poll timeout, so the
/// client never aborts a poll Telegram is still holding open.
const HTTP_TIMEOUT_MARGIN: Duration = Duration::from_secs(15);

pub struct TeloxideTransport {
    bot: Bot,
    username: Option<String>,
    offset: AtomicI32,
}

impl TeloxideTransport {
    /// Verify the token, clear any webhook, and register bot commands.
    pub async fn connect(token: &Secret<String>, poll_timeout: Duration) -> Result<Self> {
        let bot = build_bot(token, poll_timeout)?;

        let me = bot.get_me().await.map_err(classify_request_error)?;
        let username = me.username.clone();

        // Long polling is refused while a webhook is set.
        bot.delete_webhook()
            .await
            .map_err(classify_request_error)?;

        let commands = vec![
            BotCommand::new("info", "Show links of this chat"),
            BotCommand::new("link", "Link this chat to a remote chat"),
            BotCommand::new("unlink", "Unlink a remote chat"),
            BotCommand::new("unlink_all", "Unlink every remote chat from this chat"),
            BotCommand::new("extra", "List extra functions of remote channels"),
        ];
        if let Err(e) = bot.set_my_commands(commands).await {
            warn!(error = %e, "failed to register bot commands");
        }

        info!(username = ?username, "telegram bot connected (webhook cleared)");
        Ok(Self {
            bot,
            username,
            offset: AtomicI32::new(0),
        })
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }
}

#[async_trait]
impl Transport for TeloxideTransport {
    async fn receive(&self, timeout: Duration) -> TransportResult<Vec<InboundUpdate>> {
        let offset = self.offset.load(Ordering::Acquire);
        let updates = self
            .bot
            .get_updates()
            .offset(offset)
            .timeout(u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX))
            .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::EditedMessage])
            .await
            .map_err(classify_request_error)?;

        if let Some(last) = updates.last() {
            self.offset.store(last.id.as_offset(), Ordering::Release);
        }
        debug!(count = updates.len(), "got telegram updates");

        Ok(updates
            .into_iter()
            .map(|update| InboundUpdate {
                update_id: update.id.0,
                kind: match &update.kind {
                    TgUpdateKind::Message(msg) => UpdateKind::Message(convert_message(msg)),
                    TgUpdateKind::EditedMessage(msg) => {
                        UpdateKind::EditedMessage(convert_message(msg))
                    },
                    _ => UpdateKind::Unsupported,
                },
            })
            .collect())
    }

    async fn send_message(
        &self,
        chat_id: i64,
        message: OutgoingMessage,
    ) -> TransportResult<MessageRef> {
        let sent = with_retry_after(chat_id, "send_message", || {
            let mut req = self.bot.send_message(ChatId(chat_id), message.text.clone());
            if message.html {
                req = req.parse_mode(ParseMode::Html);
            }
            if let Some(reply_to) = message.reply_to {
                req = req.reply_parameters(
                    ReplyParameters::new(MessageId(reply_to)).allow_sending_without_reply(),
                );
            }
            async move { req.await }
        })
        .await?;
        Ok(MessageRef {
            chat_id: sent.chat.id.0,
            message_id: sent.id.0,
        })
    }

    async fn edit_message(
        &self,
        target: MessageRef,
        message: OutgoingMessage,
    ) -> TransportResult<MessageRef> {
        with_retry_after(target.chat_id, "edit_message", || {
            let mut req = self.bot.edit_message_text(
                ChatId(target.chat_id),
                MessageId(target.message_id),
                message.text.clone(),
            );
            if message.html {
                req = req.parse_mode(ParseMode::Html);
            }
            async move { req.await }
        })
        .await?;
        Ok(target)
    }

    async fn delete_message(&self, target: MessageRef) -> TransportResult<()> {
        with_retry_after(target.chat_id, "delete_message", || {
            let req = self
                .bot
                .delete_message(ChatId(target.chat_id), MessageId(target.message_id));
            async move { req.await }
        })
        .await?;
        Ok(())
    }
}

/// Run a request, sleeping through rate limits a bounded number of times.
/// Bot whose HTTP client outlives a long poll of `poll_timeout`.
///
/// The client builder error belongs to teloxide's own reqwest, so it is
/// carried as a message.
fn build_bot(token: &Secret<String>, poll_timeout: Duration) -> Result<Bot> {
    let client = teloxide::net::default_reqwest_settings()
        .timeout(poll_timeout + HTTP_TIMEOUT_MARGIN)
        .build()
        .map_err(|e| Error::message(format!("failed to build HTTP client: {e}")))?;
    Ok(Bot::with_client(token.expose_secret(), client))
}

async fn with_retry_after<T, F, Fut>(
    chat_id: i64,
    operation: &'static str,
    mut request: F,
) -> TransportResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, RequestError>>,
{
    let mut retries = 0usize;

    loop {
        match request().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let Some(wait) = retry_after_duration(&err) else {
                    return Err(classify_request_error(err));
                };

                if retries >= RETRY_AFTER_MAX_RETRIES {
                    warn!(
                        chat_id,
                        operation,
                        retries,
                        retry_after_secs = wait.as_secs(),
                        "telegram rate limit persisted after retries"
                    );
                    return Err(classify_request_error(err));
                }

                retries += 1;
                warn!(
                    chat_id,
                    operation,
                    retries,
                    max_retries = RETRY_AFTER_MAX_RETRIES,
                    retry_after_secs = wait.as_secs(),
                    "telegram rate limited, waiting before retry"
                );
                tokio::time::sleep(wait).await;
            },
        }
    }
}

fn retry_after_duration(error: &RequestError) -> Option<Duration> {
    match error {
        RequestError::RetryAfter(wait) => Some(wait.duration()),
        _ => None,
    }
}

/// Sort a teloxide error into the transport taxonomy.
pub fn classify_request_error(error: RequestError) -> TransportError {
    match error {
        RequestError::Api(ApiError::TerminatedByOtherGetUpdates) => TransportError::Conflict,
        RequestError::Api(
            api @ (ApiError::InvalidToken
            | ApiError::BotBlocked
            | ApiError::BotKicked
            | ApiError::BotKickedFromSupergroup
            | ApiError::UserDeactivated),
        ) => TransportError::Unauthorized(api.to_string()),
        RequestError::Api(ApiError::MessageNotModified) => TransportError::NotModified,
        RequestError::Api(api) => TransportError::BadRequest(api.to_string()),
        RequestError::MigrateToChatId(chat) => TransportError::ChatMigrated {
            new_chat_id: chat.0,
        },
        RequestError::RetryAfter(wait) => TransportError::network(
            false,
            format!("rate limited for {}s", wait.duration().as_secs()),
        ),
        RequestError::Network(e) => TransportError::network(e.is_timeout(), e.to_string()),
        RequestError::Io(e) => {
            TransportError::network(e.kind() == std::io::ErrorKind::TimedOut, e.to_string())
        },
        other => TransportError::Other(other.to_string()),
    }
}

fn convert_message(msg: &Message) -> TelegramMessage {
    let chat_kind = match msg.chat.kind {
        ChatKind::Private(_) => TelegramChatKind::Private,
        ChatKind::Public(ref p) => match p.kind {
            PublicChatKind::Channel(_) => TelegramChatKind::Channel,
            PublicChatKind::Supergroup(_) => TelegramChatKind::Supergroup,
            _ => TelegramChatKind::Group,
        },
    };
    let sender_name = msg
        .from
        .as_ref()
        .map(|u| {
            let name = u.full_name();
            if name.trim().is_empty() {
                u.username.clone().unwrap_or_default()
            } else {
                name
            }
        })
        .unwrap_or_default();

    TelegramMessage {
        chat_id: msg.chat.id.0,
        chat_kind,
        chat_title: msg.chat.title().map(str::to_string),
        message_id: msg.id.0,
        sender_id: msg
            .from
            .as_ref()
            .and_then(|u| i64::try_from(u.id.0).ok()),
        sender_name,
        text: msg.text().or_else(|| msg.caption()).map(str::to_string),
        reply_to_message_id: msg.reply_to_message().map(|r| r.id.0),
        migrate_to_chat_id: msg.migrate_to_chat_id().map(|c| c.0),
    }
}
