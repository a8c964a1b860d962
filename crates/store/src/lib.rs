//! SQLite persistence for monitored channels and their webhook targets.
//!
//! [`SqliteTargetStore`] backs both the administrative commands and the
//! forwarding pipeline's [`TargetStore`] lookups.

pub mod error;

use {
    async_trait::async_trait,
    postrelay_common::types::{Channel, ChannelId, NewTarget, Target, UserId},
    postrelay_forward::TargetStore,
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
    tracing::{debug, info},
};

pub use error::{Error, Result};

use error::Context;

/// Run database migrations for the store.
///
/// Creates the `channels` and `targets` tables.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}

type TargetRow = (i64, i64, String, String, Option<String>, Option<String>);

fn target_from_row(r: TargetRow) -> Target {
    Target {
        id: r.0,
        channel_id: r.1,
        webhook: r.2,
        name: r.3,
        key: r.4,
        prefix: r.5,
    }
}

/// SQLite-backed channel and target registry.
#[derive(Clone)]
pub struct SqliteTargetStore {
    pool: SqlitePool,
}

impl SqliteTargetStore {
    /// Open a pool for `database_url` and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .with_context(|| format!("failed to open {database_url}"))?;
        run_migrations(&pool).await?;
        debug!(database_url, "store ready");
        Ok(Self { pool })
    }

    /// Use an existing pool; [`run_migrations`] must have been called.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ── Channels ────────────────────────────────────────────────────────────

    /// Register a channel. Returns `false` if it is already registered.
    pub async fn add_channel(&self, channel: Channel) -> Result<bool> {
        let result =
            sqlx::query("INSERT INTO channels (id, owner_id) VALUES (?, ?) ON CONFLICT(id) DO NOTHING")
                .bind(channel.id)
                .bind(channel.owner_id)
                .execute(&self.pool)
                .await?;
        let added = result.rows_affected() > 0;
        if added {
            info!(channel_id = channel.id, owner_id = channel.owner_id, "channel registered");
        }
        Ok(added)
    }

    /// Remove channels together with all of their targets. Returns the number
    /// of channels removed.
    pub async fn remove_channels(&self, ids: &[ChannelId]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for id in ids {
            sqlx::query("DELETE FROM targets WHERE channel_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            removed += sqlx::query("DELETE FROM channels WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        info!(requested = ids.len(), removed, "channels removed");
        Ok(removed)
    }

    pub async fn channel_exists(&self, id: ChannelId) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM channels WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Whether `owner_id` owns at least one row (its private chat included).
    pub async fn owner_exists(&self, owner_id: UserId) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM channels WHERE owner_id = ? LIMIT 1")
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    pub async fn check_ownership(&self, id: ChannelId, owner_id: UserId) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM channels WHERE id = ? AND owner_id = ?")
                .bind(id)
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Channels owned by `owner_id`, ordered by id.
    pub async fn owned_channels(&self, owner_id: UserId) -> Result<Vec<Channel>> {
        let rows: Vec<(i64, i64)> =
            sqlx::query_as("SELECT id, owner_id FROM channels WHERE owner_id = ? ORDER BY id")
                .bind(owner_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(id, owner_id)| Channel { id, owner_id })
            .collect())
    }

    /// All registered rows, ordered by owner then id.
    pub async fn list_channels(&self) -> Result<Vec<Channel>> {
        let rows: Vec<(i64, i64)> =
            sqlx::query_as("SELECT id, owner_id FROM channels ORDER BY owner_id, id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(id, owner_id)| Channel { id, owner_id })
            .collect())
    }

    pub async fn owner_for(&self, id: ChannelId) -> Result<Option<UserId>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT owner_id FROM channels WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(owner_id,)| owner_id))
    }

    // ── Targets ─────────────────────────────────────────────────────────────

    pub async fn webhook_exists(&self, webhook: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM targets WHERE webhook = ?")
            .bind(webhook)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Add a target after validating it. Returns `None` if the webhook is
    /// already used by any target.
    pub async fn add_target(&self, target: NewTarget) -> Result<Option<Target>> {
        let target = target.validate()?;
        let result = sqlx::query(
            "INSERT INTO targets (webhook, name, channel_id, key, prefix)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(webhook) DO NOTHING",
        )
        .bind(&target.webhook)
        .bind(&target.name)
        .bind(target.channel_id)
        .bind(&target.key)
        .bind(&target.prefix)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        let id = result.last_insert_rowid();
        info!(target_id = id, channel_id = target.channel_id, name = %target.name, "target added");
        Ok(Some(Target {
            id,
            channel_id: target.channel_id,
            webhook: target.webhook,
            name: target.name,
            key: target.key,
            prefix: target.prefix,
        }))
    }

    /// Remove a target, scoped to its channel. Returns `false` if nothing
    /// matched.
    pub async fn remove_target(&self, id: i64, channel_id: ChannelId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM targets WHERE id = ? AND channel_id = ?")
            .bind(id)
            .bind(channel_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Overwrite name, webhook, key and prefix of an existing target.
    /// Returns `false` if the target does not exist.
    pub async fn update_target(&self, target: &Target) -> Result<bool> {
        let checked = NewTarget {
            channel_id: target.channel_id,
            webhook: target.webhook.clone(),
            name: target.name.clone(),
            key: target.key.clone(),
            prefix: target.prefix.clone(),
        }
        .validate()?;
        let result = sqlx::query(
            "UPDATE targets SET webhook = ?, name = ?, key = ?, prefix = ?
             WHERE id = ? AND channel_id = ?",
        )
        .bind(&checked.webhook)
        .bind(&checked.name)
        .bind(&checked.key)
        .bind(&checked.prefix)
        .bind(target.id)
        .bind(target.channel_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_target(&self, id: i64) -> Result<Option<Target>> {
        let row: Option<TargetRow> = sqlx::query_as(
            "SELECT id, channel_id, webhook, name, key, prefix FROM targets WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(target_from_row))
    }

    /// Targets of a channel in insertion order.
    pub async fn targets_for(&self, channel_id: ChannelId) -> Result<Vec<Target>> {
        let rows: Vec<TargetRow> = sqlx::query_as(
            "SELECT id, channel_id, webhook, name, key, prefix
             FROM targets WHERE channel_id = ? ORDER BY id",
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(target_from_row).collect())
    }
}

#[async_trait]
impl TargetStore for SqliteTargetStore {
    async fn targets_for(&self, channel_id: ChannelId) -> anyhow::Result<Vec<Target>> {
        Ok(SqliteTargetStore::targets_for(self, channel_id).await?)
    }

    async fn owner_for(&self, channel_id: ChannelId) -> anyhow::Result<Option<UserId>> {
        Ok(SqliteTargetStore::owner_for(self, channel_id).await?)
    }
}
