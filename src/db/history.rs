//! Download history database operations

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::sqlite_helpers::{decode_err, now_iso8601, str_to_datetime, str_to_uuid, uuid_to_str};
use crate::services::history::{HistoryEntry, HistoryStore, NewHistoryEntry};

/// A history row as stored in SQLite
#[derive(Debug, Clone)]
pub struct HistoryRecord(pub HistoryEntry);

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for HistoryRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let subscription_str: String = row.try_get("subscription_id")?;
        let created_str: String = row.try_get("created_at")?;

        Ok(Self(HistoryEntry {
            id: str_to_uuid(&id_str).map_err(decode_err)?,
            item_id: row.try_get("item_id")?,
            subscription_id: str_to_uuid(&subscription_str).map_err(decode_err)?,
            video_url: row.try_get("video_url")?,
            download_path: row.try_get("download_path")?,
            title: row.try_get("title")?,
            language: row.try_get("language")?,
            created_at: str_to_datetime(&created_str).map_err(decode_err)?,
        }))
    }
}

pub struct HistoryRepository {
    pool: SqlitePool,
}

impl HistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, item_id: &str, subscription_id: Uuid) -> Result<Option<HistoryEntry>> {
        let record = sqlx::query_as::<_, HistoryRecord>(
            "SELECT * FROM download_history WHERE item_id = ? AND subscription_id = ?",
        )
        .bind(item_id)
        .bind(uuid_to_str(subscription_id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(|r| r.0))
    }

    /// Remove every entry of a subscription
    pub async fn clear_subscription(&self, subscription_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM download_history WHERE subscription_id = ?")
            .bind(uuid_to_str(subscription_id))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl HistoryStore for HistoryRepository {
    async fn exists(&self, item_id: &str, subscription_id: Uuid) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM download_history WHERE item_id = ? AND subscription_id = ?",
        )
        .bind(item_id)
        .bind(uuid_to_str(subscription_id))
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn add(&self, entry: NewHistoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO download_history
                (id, item_id, subscription_id, video_url, download_path, title, language, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid_to_str(Uuid::new_v4()))
        .bind(&entry.item_id)
        .bind(uuid_to_str(entry.subscription_id))
        .bind(&entry.video_url)
        .bind(&entry.download_path)
        .bind(&entry.title)
        .bind(&entry.language)
        .bind(now_iso8601())
        .execute(&self.pool)
        .await?;

        tracing::debug!(item_id = %entry.item_id, subscription_id = %entry.subscription_id, "Recorded history entry");
        Ok(())
    }

    async fn by_subscription(&self, subscription_id: Uuid) -> Result<Vec<HistoryEntry>> {
        let records = sqlx::query_as::<_, HistoryRecord>(
            "SELECT * FROM download_history WHERE subscription_id = ? ORDER BY created_at DESC",
        )
        .bind(uuid_to_str(subscription_id))
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(|r| r.0).collect())
    }
}
