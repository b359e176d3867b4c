//! Subscription model
//!
//! Subscriptions live in a JSON file. Every settings group defaults on its own
//! so hand-written files only need the fields they change.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::search::{QueryField, SearchQuery};

/// A persistent search plus its download policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub download: DownloadSettings,
    #[serde(default)]
    pub series: SeriesSettings,
    #[serde(default)]
    pub accessibility: AccessibilitySettings,
    #[serde(default)]
    pub metadata: MetadataSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub criteria: Vec<QueryField>,
    pub min_duration_minutes: Option<u64>,
    pub max_duration_minutes: Option<u64>,
    pub include_future: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub download_path: Option<PathBuf>,
    /// Write `.strm` files instead of downloading
    pub use_streaming_url_files: bool,
    /// Download the whole video for non-default languages instead of extracting audio
    pub download_full_video_for_secondary_audio: bool,
    pub allow_fallback_to_lower_quality: bool,
    /// Validate candidate URLs before choosing one
    pub quality_check_with_url: bool,
    pub auto_upgrade_to_higher_quality: bool,
    pub always_create_subfolder: bool,
    /// Scan the target directory for already owned episodes
    pub enhanced_duplicate_detection: bool,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            download_path: None,
            use_streaming_url_files: false,
            download_full_video_for_secondary_audio: false,
            allow_fallback_to_lower_quality: true,
            quality_check_with_url: false,
            auto_upgrade_to_higher_quality: false,
            always_create_subfolder: false,
            enhanced_duplicate_detection: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesSettings {
    pub enforce_series_parsing: bool,
    pub allow_absolute_episode_numbering: bool,
    pub treat_non_episodes_as_extras: bool,
    pub save_trailers: bool,
    pub save_interviews: bool,
    pub save_generic_extras: bool,
    pub save_extras_as_strm: bool,
}

impl Default for SeriesSettings {
    fn default() -> Self {
        Self {
            enforce_series_parsing: false,
            allow_absolute_episode_numbering: false,
            treat_non_episodes_as_extras: false,
            save_trailers: true,
            save_interviews: true,
            save_generic_extras: true,
            save_extras_as_strm: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessibilitySettings {
    pub allow_audio_description: bool,
    pub allow_sign_language: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataSettings {
    pub create_nfo: bool,
    /// Language assigned to original-version items
    pub original_language: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Subscription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            enabled: true,
            search: SearchSettings::default(),
            download: DownloadSettings::default(),
            series: SeriesSettings::default(),
            accessibility: AccessibilitySettings::default(),
            metadata: MetadataSettings::default(),
        }
    }

    /// API query for this subscription; durations are converted to seconds.
    pub fn search_query(&self) -> SearchQuery {
        SearchQuery {
            queries: self.search.criteria.clone(),
            min_duration: self.search.min_duration_minutes.map(|m| m * 60),
            max_duration: self.search.max_duration_minutes.map(|m| m * 60),
            include_future: self.search.include_future,
        }
    }

    /// Override for original-version items, if one is configured.
    pub fn original_language(&self) -> Option<&str> {
        self.metadata
            .original_language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }
}

/// Load the subscription list. A missing file is an empty list.
pub async fn load_subscriptions(path: &Path) -> Result<Vec<Subscription>> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(Vec::new());
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read subscriptions file {}", path.display()))?;

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse subscriptions file {}", path.display()))
}
