//! Database module
//!
//! SQLite holds the download history and the probe cache. The schema is
//! small enough to be created in place on startup.

pub mod history;
pub mod quality_cache;
pub mod sqlite_helpers;

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub use history::HistoryRepository;
pub use quality_cache::QualityCacheRepository;

const MAX_CONNECTIONS: u32 = 5;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS download_history (
        id TEXT PRIMARY KEY NOT NULL,
        item_id TEXT NOT NULL,
        subscription_id TEXT NOT NULL,
        video_url TEXT NOT NULL DEFAULT '',
        download_path TEXT NOT NULL DEFAULT '',
        title TEXT NOT NULL DEFAULT '',
        language TEXT NOT NULL DEFAULT 'deu',
        created_at TEXT NOT NULL,
        UNIQUE (item_id, subscription_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_download_history_subscription ON download_history (subscription_id)",
    r#"
    CREATE TABLE IF NOT EXISTS quality_cache (
        url_hash TEXT PRIMARY KEY NOT NULL,
        width INTEGER NOT NULL,
        height INTEGER NOT NULL,
        duration REAL NOT NULL,
        size INTEGER NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
];

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) the database file and apply the schema.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        if let Some(parent) = Path::new(options.get_filename()).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let db = Self::new(pool);
        db.migrate().await?;
        tracing::info!(url = %database_url, "Database ready");
        Ok(db)
    }

    /// In-memory database for tests. Single connection so every
    /// query sees the same data.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;
        let db = Self::new(pool);
        db.migrate().await?;
        Ok(db)
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply database schema")?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn history(&self) -> HistoryRepository {
        HistoryRepository::new(self.pool.clone())
    }

    pub fn quality_cache(&self) -> QualityCacheRepository {
        QualityCacheRepository::new(self.pool.clone())
    }
}
