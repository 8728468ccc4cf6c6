//! Telegram chat ↔ slave chat bindings.
//!
//! Rows are never updated in place. Linking a slave chat that is already
//! bound elsewhere moves it (delete then insert), and a chat migration
//! re-creates every row under the new Telegram id. Each operation runs in a
//! single transaction, so readers never observe half of a move.

use {
    async_trait::async_trait,
    etm_common::{ChatIdentifier, time::now_ms},
    sqlx::{SqliteConnection, SqlitePool},
    tracing::{debug, info},
};

use crate::error::{Error, Result};

/// A persisted link between a Telegram chat and a slave chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub id: i64,
    pub master_uid: ChatIdentifier,
    pub slave_uid: ChatIdentifier,
    pub created_at: i64,
}

/// How many slave chats one Telegram chat may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingPolicy {
    Single,
    Multiple,
}

impl BindingPolicy {
    /// Policy for the `multiple_slave_chats` flag.
    #[must_use]
    pub fn from_flag(multiple_slave_chats: bool) -> Self {
        if multiple_slave_chats {
            Self::Multiple
        } else {
            Self::Single
        }
    }
}

/// What `link` does when single-binding policy would be violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkMode {
    /// Fail with [`Error::PolicyViolation`].
    #[default]
    Strict,
    /// Drop the Telegram chat's existing links first.
    Replace,
}

#[async_trait]
pub trait BindingStore: Send + Sync {
    fn policy(&self) -> BindingPolicy;

    /// Link `slave` to `master`. Linking an existing pair returns the
    /// existing row unchanged.
    async fn link(
        &self,
        master: &ChatIdentifier,
        slave: &ChatIdentifier,
        mode: LinkMode,
    ) -> Result<Binding>;

    /// Remove the link of `slave`. Returns whether a row was removed.
    async fn unlink(&self, slave: &ChatIdentifier) -> Result<bool>;

    /// Remove every link of `master`. Returns the number of rows removed.
    async fn unlink_all(&self, master: &ChatIdentifier) -> Result<u64>;

    /// Links of `master`, oldest first.
    async fn lookup_by_master(&self, master: &ChatIdentifier) -> Result<Vec<Binding>>;

    async fn lookup_by_slave(&self, slave: &ChatIdentifier) -> Result<Option<Binding>>;

    /// Move every link of `old` to `new`, keeping their relative order.
    /// Returns the number of links moved.
    async fn migrate(&self, old: &ChatIdentifier, new: &ChatIdentifier) -> Result<u64>;

    /// Every link, ordered by Telegram chat then insertion.
    async fn list(&self) -> Result<Vec<Binding>>;
}

#[derive(sqlx::FromRow)]
struct BindingRow {
    id: i64,
    master_uid: String,
    slave_uid: String,
    created_at: i64,
}

impl TryFrom<BindingRow> for Binding {
    type Error = Error;

    fn try_from(r: BindingRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            master_uid: r
                .master_uid
                .parse()
                .map_err(|e| Error::corrupt("bindings", e))?,
            slave_uid: r
                .slave_uid
                .parse()
                .map_err(|e| Error::corrupt("bindings", e))?,
            created_at: r.created_at,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, master_uid, slave_uid, created_at FROM bindings";

/// Take the write lock up front so concurrent writers queue on the busy
/// timeout instead of failing when a read lock upgrades.
const BEGIN_WRITE: &str = "BEGIN IMMEDIATE";

/// SQLite-backed binding store.
pub struct SqliteBindingStore {
    pool: SqlitePool,
    policy: BindingPolicy,
}

impl SqliteBindingStore {
    pub fn new(pool: SqlitePool, policy: BindingPolicy) -> Self {
        Self { pool, policy }
    }

    async fn insert(
        conn: &mut SqliteConnection,
        master: &str,
        slave: &str,
        created_at: i64,
    ) -> Result<Binding> {
        let row = sqlx::query_as::<_, BindingRow>(
            r#"INSERT INTO bindings (master_uid, slave_uid, created_at)
               VALUES (?, ?, ?)
               RETURNING id, master_uid, slave_uid, created_at"#,
        )
        .bind(master)
        .bind(slave)
        .bind(created_at)
        .fetch_one(conn)
        .await?;
        row.try_into()
    }
}

#[async_trait]
impl BindingStore for SqliteBindingStore {
    fn policy(&self) -> BindingPolicy {
        self.policy
    }

    async fn link(
        &self,
        master: &ChatIdentifier,
        slave: &ChatIdentifier,
        mode: LinkMode,
    ) -> Result<Binding> {
        let master_key = master.encode();
        let slave_key = slave.encode();
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;

        let current = sqlx::query_as::<_, BindingRow>(&format!(
            "{SELECT_COLUMNS} WHERE slave_uid = ?"
        ))
        .bind(&slave_key)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = current
            && row.master_uid == master_key
        {
            tx.commit().await?;
            return row.try_into();
        }

        if self.policy == BindingPolicy::Single {
            let others: Vec<String> = sqlx::query_scalar(
                "SELECT slave_uid FROM bindings WHERE master_uid = ? ORDER BY id",
            )
            .bind(&master_key)
            .fetch_all(&mut *tx)
            .await?;
            if !others.is_empty() {
                if mode == LinkMode::Strict {
                    return Err(Error::PolicyViolation {
                        master: master_key,
                        existing: others.join(", "),
                    });
                }
                sqlx::query("DELETE FROM bindings WHERE master_uid = ?")
                    .bind(&master_key)
                    .execute(&mut *tx)
                    .await?;
                debug!(master = %master_key, replaced = others.len(), "replaced existing links");
            }
        }

        // A slave chat lives under one Telegram chat: linking moves it.
        sqlx::query("DELETE FROM bindings WHERE slave_uid = ?")
            .bind(&slave_key)
            .execute(&mut *tx)
            .await?;
        let binding = Self::insert(&mut *tx, &master_key, &slave_key, now_ms()).await?;
        tx.commit().await?;

        debug!(master = %master_key, slave = %slave_key, "binding stored");
        Ok(binding)
    }

    async fn unlink(&self, slave: &ChatIdentifier) -> Result<bool> {
        let done = sqlx::query("DELETE FROM bindings WHERE slave_uid = ?")
            .bind(slave.encode())
            .execute(&self.pool)
            .await?;
        let removed = done.rows_affected() > 0;
        if removed {
            debug!(slave = %slave, "binding deleted");
        }
        Ok(removed)
    }

    async fn unlink_all(&self, master: &ChatIdentifier) -> Result<u64> {
        let done = sqlx::query("DELETE FROM bindings WHERE master_uid = ?")
            .bind(master.encode())
            .execute(&self.pool)
            .await?;
        let removed = done.rows_affected();
        if removed > 0 {
            debug!(master = %master, removed, "bindings deleted");
        }
        Ok(removed)
    }

    async fn lookup_by_master(&self, master: &ChatIdentifier) -> Result<Vec<Binding>> {
        let rows = sqlx::query_as::<_, BindingRow>(&format!(
            "{SELECT_COLUMNS} WHERE master_uid = ? ORDER BY id"
        ))
        .bind(master.encode())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn lookup_by_slave(&self, slave: &ChatIdentifier) -> Result<Option<Binding>> {
        let row = sqlx::query_as::<_, BindingRow>(&format!("{SELECT_COLUMNS} WHERE slave_uid = ?"))
            .bind(slave.encode())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn migrate(&self, old: &ChatIdentifier, new: &ChatIdentifier) -> Result<u64> {
        if old == new {
            return Ok(0);
        }
        let old_key = old.encode();
        let new_key = new.encode();
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;

        let mut moved: Vec<(i64, String, i64)> = sqlx::query_as(
            "DELETE FROM bindings WHERE master_uid = ? RETURNING id, slave_uid, created_at",
        )
        .bind(&old_key)
        .fetch_all(&mut *tx)
        .await?;

        // The migrated chat carries the links; under the single policy any
        // stale links of the new id give way.
        if self.policy == BindingPolicy::Single && !moved.is_empty() {
            let replaced = sqlx::query("DELETE FROM bindings WHERE master_uid = ?")
                .bind(&new_key)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if replaced > 0 {
                debug!(new = %new_key, replaced, "replaced links of migration target");
            }
        }

        // RETURNING order is unspecified; re-insert in the original order.
        moved.sort_by_key(|(id, ..)| *id);
        for (_, slave_key, created_at) in &moved {
            Self::insert(&mut *tx, &new_key, slave_key, *created_at).await?;
        }
        tx.commit().await?;

        info!(old = %old_key, new = %new_key, moved = moved.len(), "links migrated");
        Ok(moved.len() as u64)
    }

    async fn list(&self) -> Result<Vec<Binding>> {
        let rows = sqlx::query_as::<_, BindingRow>(&format!(
            "{SELECT_COLUMNS} ORDER BY master_uid, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}
