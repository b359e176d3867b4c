//! Download history
//!
//! One row per `(item_id, subscription_id)`. Adding an entry for a pair that
//! already exists replaces it.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A processed catalog item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub item_id: String,
    pub subscription_id: Uuid,
    /// Empty for local copies recorded by duplicate detection
    pub video_url: String,
    pub download_path: String,
    pub title: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
}

/// Fields of a new history row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    pub video_url: String,
    pub item_id: String,
    pub subscription_id: Uuid,
    pub download_path: String,
    pub title: String,
    pub language: String,
}

impl NewHistoryEntry {
    fn into_entry(self) -> HistoryEntry {
        HistoryEntry {
            id: Uuid::new_v4(),
            item_id: self.item_id,
            subscription_id: self.subscription_id,
            video_url: self.video_url,
            download_path: self.download_path,
            title: self.title,
            language: self.language,
            created_at: Utc::now(),
        }
    }
}

/// History store seam
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn exists(&self, item_id: &str, subscription_id: Uuid) -> Result<bool>;

    async fn add(&self, entry: NewHistoryEntry) -> Result<()>;

    async fn by_subscription(&self, subscription_id: Uuid) -> Result<Vec<HistoryEntry>>;
}

/// In-memory history for tests
#[derive(Default)]
pub struct MemoryHistoryStore {
    entries: RwLock<HashMap<(String, Uuid), HistoryEntry>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, item_id: &str, subscription_id: Uuid) -> Option<HistoryEntry> {
        self.entries
            .read()
            .get(&(item_id.to_string(), subscription_id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn exists(&self, item_id: &str, subscription_id: Uuid) -> Result<bool> {
        Ok(self
            .entries
            .read()
            .contains_key(&(item_id.to_string(), subscription_id)))
    }

    async fn add(&self, entry: NewHistoryEntry) -> Result<()> {
        let key = (entry.item_id.clone(), entry.subscription_id);
        self.entries.write().insert(key, entry.into_entry());
        Ok(())
    }

    async fn by_subscription(&self, subscription_id: Uuid) -> Result<Vec<HistoryEntry>> {
        let mut entries: Vec<HistoryEntry> = self
            .entries
            .read()
            .values()
            .filter(|e| e.subscription_id == subscription_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }
}
