//! Probe result cache keyed by URL hash

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;

use super::sqlite_helpers::{datetime_to_str, decode_err, str_to_datetime};
use crate::services::quality::{QualityCache, QualityCacheEntry};

#[derive(Debug, Clone)]
pub struct QualityCacheRecord(pub QualityCacheEntry);

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for QualityCacheRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let width: i64 = row.try_get("width")?;
        let height: i64 = row.try_get("height")?;
        let size: i64 = row.try_get("size")?;
        let updated_str: String = row.try_get("updated_at")?;

        Ok(Self(QualityCacheEntry {
            url_hash: row.try_get("url_hash")?,
            width: width.max(0) as u32,
            height: height.max(0) as u32,
            duration: row.try_get("duration")?,
            size: size.max(0) as u64,
            updated_at: str_to_datetime(&updated_str).map_err(decode_err)?,
        }))
    }
}

pub struct QualityCacheRepository {
    pool: SqlitePool,
}

impl QualityCacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QualityCache for QualityCacheRepository {
    async fn get(&self, url_hash: &str) -> Result<Option<QualityCacheEntry>> {
        let record = sqlx::query_as::<_, QualityCacheRecord>("SELECT * FROM quality_cache WHERE url_hash = ?")
            .bind(url_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record.map(|r| r.0))
    }

    async fn put(&self, entry: QualityCacheEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO quality_cache (url_hash, width, height, duration, size, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.url_hash)
        .bind(entry.width as i64)
        .bind(entry.height as i64)
        .bind(entry.duration)
        .bind(entry.size as i64)
        .bind(datetime_to_str(entry.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn invalidate(&self, url_hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM quality_cache WHERE url_hash = ?")
            .bind(url_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::services::ffmpeg::MediaProbe;

    fn probe() -> MediaProbe {
        MediaProbe {
            width: Some(1920),
            height: Some(1080),
            duration: Some(2700.5),
            size: Some(1_500_000_000),
        }
    }

    #[tokio::test]
    async fn test_put_get_invalidate() {
        let db = Database::in_memory().await.unwrap();
        let cache = db.quality_cache();

        assert!(cache.get("abc").await.unwrap().is_none());

        cache.put(QualityCacheEntry::from_probe("abc", &probe())).await.unwrap();
        let entry = cache.get("abc").await.unwrap().unwrap();
        assert_eq!(entry.width, 1920);
        assert_eq!(entry.height, 1080);
        assert_eq!(entry.size, 1_500_000_000);
        assert!((entry.duration - 2700.5).abs() < f64::EPSILON);

        cache.invalidate("abc").await.unwrap();
        assert!(cache.get("abc").await.unwrap().is_none());
    }
}
