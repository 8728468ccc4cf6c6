use {
    async_trait::async_trait,
    etm_common::ChatIdentifier,
    sqlx::SqlitePool,
    tracing::debug,
};

use crate::error::{Error, Result};

/// Which side a logged message was delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Slave message mirrored into Telegram.
    ToMaster,
    /// Telegram message delivered to a slave.
    ToSlave,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Self::ToMaster => "master",
            Self::ToSlave => "slave",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "master" => Some(Self::ToMaster),
            "slave" => Some(Self::ToSlave),
            _ => None,
        }
    }
}

/// Key of a Telegram message in the log: `"<chat_id>.<message_id>"`.
#[must_use]
pub fn master_msg_key(chat_id: i64, message_id: i32) -> String {
    format!("{chat_id}.{message_id}")
}

/// Split a [`master_msg_key`] back into chat id and message id.
#[must_use]
pub fn parse_master_msg_key(key: &str) -> Option<(i64, i32)> {
    let (chat, msg) = key.rsplit_once('.')?;
    Some((chat.parse().ok()?, msg.parse().ok()?))
}

/// One Telegram message paired with the slave message it mirrors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgLogEntry {
    pub master_msg_id: String,
    pub slave_message_id: String,
    pub slave_origin_uid: ChatIdentifier,
    pub text: String,
    pub sent_to: Direction,
    pub created_at: i64,
}

impl MsgLogEntry {
    /// Telegram chat id and message id of this entry.
    #[must_use]
    pub fn master_ids(&self) -> Option<(i64, i32)> {
        parse_master_msg_key(&self.master_msg_id)
    }
}

#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Insert or overwrite the entry for `entry.master_msg_id`.
    async fn record(&self, entry: MsgLogEntry) -> Result<()>;

    async fn by_master(&self, master_msg_id: &str) -> Result<Option<MsgLogEntry>>;

    /// Telegram copies of a slave message, newest first.
    async fn by_slave(
        &self,
        slave_message_id: &str,
        origin: &ChatIdentifier,
    ) -> Result<Vec<MsgLogEntry>>;

    /// Forget a message. Returns whether an entry existed.
    async fn remove(&self, master_msg_id: &str) -> Result<bool>;
}

#[derive(sqlx::FromRow)]
struct MsgLogRow {
    master_msg_id: String,
    slave_message_id: String,
    slave_origin_uid: String,
    text: String,
    sent_to: String,
    created_at: i64,
}

impl TryFrom<MsgLogRow> for MsgLogEntry {
    type Error = Error;

    fn try_from(r: MsgLogRow) -> Result<Self> {
        Ok(Self {
            slave_origin_uid: r
                .slave_origin_uid
                .parse()
                .map_err(|e| Error::corrupt("msg_log", e))?,
            sent_to: Direction::parse(&r.sent_to)
                .ok_or_else(|| Error::corrupt("msg_log", format!("bad direction {:?}", r.sent_to)))?,
            master_msg_id: r.master_msg_id,
            slave_message_id: r.slave_message_id,
            text: r.text,
            created_at: r.created_at,
        })
    }
}

/// SQLite-backed message log.
pub struct SqliteMessageLog {
    pool: SqlitePool,
}

impl SqliteMessageLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageLog for SqliteMessageLog {
    async fn record(&self, entry: MsgLogEntry) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO msg_log
                 (master_msg_id, slave_message_id, slave_origin_uid, text, sent_to, created_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(master_msg_id) DO UPDATE SET
                 slave_message_id = excluded.slave_message_id,
                 slave_origin_uid = excluded.slave_origin_uid,
                 text = excluded.text,
                 sent_to = excluded.sent_to"#,
        )
        .bind(&entry.master_msg_id)
        .bind(&entry.slave_message_id)
        .bind(entry.slave_origin_uid.encode())
        .bind(&entry.text)
        .bind(entry.sent_to.as_str())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        debug!(master_msg_id = %entry.master_msg_id, sent_to = entry.sent_to.as_str(), "recorded message");
        Ok(())
    }

    async fn by_master(&self, master_msg_id: &str) -> Result<Option<MsgLogEntry>> {
        let row = sqlx::query_as::<_, MsgLogRow>("SELECT * FROM msg_log WHERE master_msg_id = ?")
            .bind(master_msg_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn by_slave(
        &self,
        slave_message_id: &str,
        origin: &ChatIdentifier,
    ) -> Result<Vec<MsgLogEntry>> {
        let rows = sqlx::query_as::<_, MsgLogRow>(
            r#"SELECT * FROM msg_log
               WHERE slave_origin_uid = ? AND slave_message_id = ?
               ORDER BY created_at DESC, rowid DESC"#,
        )
        .bind(origin.encode())
        .bind(slave_message_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn remove(&self, master_msg_id: &str) -> Result<bool> {
        let done = sqlx::query("DELETE FROM msg_log WHERE master_msg_id = ?")
            .bind(master_msg_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }
}
