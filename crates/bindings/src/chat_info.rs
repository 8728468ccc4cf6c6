//! Cache of slave chat names, used to resolve link patterns and label chats.

use {
    async_trait::async_trait,
    etm_channels::{ChatKind, SlaveChat},
    etm_common::{ChatIdentifier, time::now_ms},
    regex::RegexBuilder,
    sqlx::SqlitePool,
};

use crate::error::{Error, Result};

#[async_trait]
pub trait ChatInfoStore: Send + Sync {
    async fn upsert(&self, chat: &SlaveChat) -> Result<()>;
    async fn remove(&self, chat: &ChatIdentifier) -> Result<()>;
    async fn get(&self, chat: &ChatIdentifier) -> Result<Option<SlaveChat>>;
    async fn list(&self) -> Result<Vec<SlaveChat>>;

    /// Chats whose `"<id> <name> <alias>"` line matches `pattern`
    /// (case-insensitive regex).
    async fn search(&self, pattern: &str) -> Result<Vec<SlaveChat>> {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| Error::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|chat| re.is_match(&search_line(chat)))
            .collect())
    }
}

fn search_line(chat: &SlaveChat) -> String {
    format!(
        "{} {} {}",
        chat.id,
        chat.name,
        chat.alias.as_deref().unwrap_or_default()
    )
}

#[derive(sqlx::FromRow)]
struct ChatInfoRow {
    chat_uid: String,
    name: String,
    alias: Option<String>,
    chat_kind: String,
}

impl TryFrom<ChatInfoRow> for SlaveChat {
    type Error = Error;

    fn try_from(r: ChatInfoRow) -> Result<Self> {
        Ok(Self {
            id: r
                .chat_uid
                .parse()
                .map_err(|e| Error::corrupt("slave_chat_info", e))?,
            kind: ChatKind::parse(&r.chat_kind).ok_or_else(|| {
                Error::corrupt("slave_chat_info", format!("bad chat kind {:?}", r.chat_kind))
            })?,
            name: r.name,
            alias: r.alias,
        })
    }
}

/// SQLite-backed chat info cache.
pub struct SqliteChatInfoStore {
    pool: SqlitePool,
}

impl SqliteChatInfoStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatInfoStore for SqliteChatInfoStore {
    async fn upsert(&self, chat: &SlaveChat) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO slave_chat_info (chat_uid, channel_id, name, alias, chat_kind, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(chat_uid) DO UPDATE SET
                 name = excluded.name,
                 alias = excluded.alias,
                 chat_kind = excluded.chat_kind,
                 updated_at = excluded.updated_at"#,
        )
        .bind(chat.id.encode())
        .bind(chat.id.channel_id())
        .bind(&chat.name)
        .bind(&chat.alias)
        .bind(chat.kind.as_str())
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, chat: &ChatIdentifier) -> Result<()> {
        sqlx::query("DELETE FROM slave_chat_info WHERE chat_uid = ?")
            .bind(chat.encode())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, chat: &ChatIdentifier) -> Result<Option<SlaveChat>> {
        let row = sqlx::query_as::<_, ChatInfoRow>(
            "SELECT chat_uid, name, alias, chat_kind FROM slave_chat_info WHERE chat_uid = ?",
        )
        .bind(chat.encode())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self) -> Result<Vec<SlaveChat>> {
        let rows = sqlx::query_as::<_, ChatInfoRow>(
            "SELECT chat_uid, name, alias, chat_kind FROM slave_chat_info ORDER BY chat_uid",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}
