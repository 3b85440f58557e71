//! SQLite subscription store.
//!
//! The database runs in write-ahead-log mode so dispatch workers keep reading
//! while subscribe/unsubscribe/sweep write. Every mutation is a single
//! statement, which SQLite applies atomically.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use tracing::instrument;

use crate::error::{HubError, Result};
use crate::lease::check_secret;
use crate::subscription::Subscription;

use super::SubscriptionStore;

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS subscriptions (
    topic TEXT NOT NULL,
    callback TEXT NOT NULL,
    secret BLOB,
    lease_expiry INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (topic, callback)
)
"#;

const CREATE_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS subscriptions_topic_lease_expiry ON subscriptions (topic, lease_expiry)";

/// Connection settings for [`SqliteStore::open`].
#[derive(Debug, Clone)]
pub struct SqliteStoreOptions {
    /// Maximum pooled connections (default: 8)
    pub max_connections: u32,
    /// How long to wait for a pooled connection (default: 5s)
    pub acquire_timeout: Duration,
    /// How long a statement waits on a locked database before failing (default: 5s)
    pub busy_timeout: Duration,
}

impl Default for SqliteStoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 8,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    topic: String,
    callback: String,
    secret: Option<Vec<u8>>,
    lease_expiry: i64,
    created_at: i64,
    updated_at: i64,
}

fn from_millis(column: &str, millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| HubError::Corrupt(format!("{column} out of range: {millis}")))
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = HubError;

    fn try_from(row: SubscriptionRow) -> Result<Self> {
        Ok(Subscription {
            lease_expiry: from_millis("lease_expiry", row.lease_expiry)?,
            created_at: from_millis("created_at", row.created_at)?,
            updated_at: from_millis("updated_at", row.updated_at)?,
            topic: row.topic,
            callback: row.callback,
            secret: row.secret,
        })
    }
}

/// Subscription store backed by a SQLite database file.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and ensure the schema exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, SqliteStoreOptions::default()).await
    }

    pub async fn open_with(path: impl AsRef<Path>, options: SqliteStoreOptions) -> Result<Self> {
        let connect = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(options.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect_with(connect)
            .await?;

        let store = Self { pool };
        store.create_schema().await?;

        tracing::info!(path = %path.as_ref().display(), "Opened subscription database");
        Ok(store)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await?;
        sqlx::query(CREATE_INDEX_SQL).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all pooled connections, checkpointing the write-ahead log.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl SubscriptionStore for SqliteStore {
    #[instrument(skip(self, secret), err)]
    async fn upsert(&self, topic: &str, callback: &str, secret: Option<&[u8]>, lease_expiry: DateTime<Utc>) -> Result<()> {
        check_secret(secret)?;

        let now = Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO subscriptions (topic, callback, secret, lease_expiry, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT (topic, callback) DO UPDATE SET
                secret = excluded.secret,
                lease_expiry = excluded.lease_expiry,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(topic)
        .bind(callback)
        .bind(secret)
        .bind(lease_expiry.timestamp_millis())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn remove(&self, topic: &str, callback: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE topic = ?1 AND callback = ?2")
            .bind(topic)
            .bind(callback)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err(level = "debug"))]
    async fn get(&self, topic: &str, callback: &str) -> Result<Subscription> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT topic, callback, secret, lease_expiry, created_at, updated_at FROM subscriptions WHERE topic = ?1 AND callback = ?2",
        )
        .bind(topic)
        .bind(callback)
        .fetch_optional(&self.pool)
        .await?;

        // Only an absent row counts as not-found; every other failure stays a storage error.
        row.ok_or_else(|| HubError::not_found(topic, callback))?.try_into()
    }

    #[instrument(skip(self), err)]
    async fn list_active(&self, topic: &str, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT topic, callback, secret, lease_expiry, created_at, updated_at
            FROM subscriptions
            WHERE topic = ?1 AND lease_expiry > ?2
            "#,
        )
        .bind(topic)
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    #[instrument(skip(self), err)]
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE lease_expiry <= ?1")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
