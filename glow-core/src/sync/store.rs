//! Durable backing for the sync queue, so pending uploads survive restarts.
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Row;
use tracing::info;

/// A photo waiting to be uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncQueueItem {
    pub photo_id: String,
    pub user_id: String,
    pub local_path: PathBuf,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl SyncQueueItem {
    pub fn new(photo_id: &str, user_id: &str, local_path: &Path) -> Self {
        Self {
            photo_id: photo_id.to_string(),
            user_id: user_id.to_string(),
            local_path: local_path.to_path_buf(),
            enqueued_at: Utc::now(),
            retry_count: 0,
        }
    }
}

#[derive(Clone)]
pub struct QueueStore {
    pool: SqlitePool,
}

impl QueueStore {
    pub async fn open(path: &Path) -> Result<Self, sqlx::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        let store = Self::connect(options).await?;
        info!("Opened sync queue at {}", path.display());
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, sqlx::Error> {
        Self::connect(SqliteConnectOptions::from_str("sqlite::memory:")?).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, sqlx::Error> {
        // One connection: an in-memory database is per connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_queue (
                photo_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                local_path TEXT NOT NULL,
                enqueued_at TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert unless the photo is already queued. Returns whether it was added.
    pub async fn insert(&self, item: &SyncQueueItem) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO sync_queue (photo_id, user_id, local_path, enqueued_at, retry_count)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&item.photo_id)
        .bind(&item.user_id)
        .bind(item.local_path.to_string_lossy().as_ref())
        .bind(item.enqueued_at)
        .bind(item.retry_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove(&self, photo_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM sync_queue WHERE photo_id = ?1")
            .bind(photo_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_retry_count(&self, photo_id: &str, retry_count: u32) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE sync_queue SET retry_count = ?1 WHERE photo_id = ?2")
            .bind(retry_count as i64)
            .bind(photo_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All items, oldest first.
    pub async fn list(&self) -> Result<Vec<SyncQueueItem>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT photo_id, user_id, local_path, enqueued_at, retry_count
            FROM sync_queue
            ORDER BY enqueued_at ASC, rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<SyncQueueItem, sqlx::Error> {
                let local_path: String = row.try_get("local_path")?;
                let retry_count: i64 = row.try_get("retry_count")?;
                Ok(SyncQueueItem {
                    photo_id: row.try_get("photo_id")?,
                    user_id: row.try_get("user_id")?,
                    local_path: PathBuf::from(local_path),
                    enqueued_at: row.try_get("enqueued_at")?,
                    retry_count: retry_count.max(0) as u32,
                })
            })
            .collect()
    }

    pub async fn clear(&self) -> Result<u64, sqlx::Error> {
        Ok(sqlx::query("DELETE FROM sync_queue")
            .execute(&self.pool)
            .await?
            .rows_affected())
    }

    pub async fn clear_user(&self, user_id: &str) -> Result<u64, sqlx::Error> {
        Ok(sqlx::query("DELETE FROM sync_queue WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected())
    }
}
