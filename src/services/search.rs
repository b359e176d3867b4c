//! Search API models and the client seam
//!
//! The pipeline only depends on [`SearchClient`]; the MediathekView HTTP
//! implementation lives in [`super::mediathek`].

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Errors from the search API. Any of them stops paging for a subscription.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("connection to search API failed: {0}")]
    Connection(String),

    #[error("search API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("could not parse search API response: {0}")]
    Parse(String),
}

/// Field a query term is matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryFieldType {
    Title,
    Topic,
    Channel,
    Description,
}

impl std::fmt::Display for QueryFieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryFieldType::Title => write!(f, "title"),
            QueryFieldType::Topic => write!(f, "topic"),
            QueryFieldType::Channel => write!(f, "channel"),
            QueryFieldType::Description => write!(f, "description"),
        }
    }
}

impl std::str::FromStr for QueryFieldType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "title" => Ok(QueryFieldType::Title),
            "topic" => Ok(QueryFieldType::Topic),
            "channel" => Ok(QueryFieldType::Channel),
            "description" => Ok(QueryFieldType::Description),
            _ => anyhow::bail!("Unknown query field: {}", s),
        }
    }
}

/// One search term and the fields it applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryField {
    pub fields: Vec<QueryFieldType>,
    pub query: String,
}

impl QueryField {
    pub fn new(fields: impl IntoIterator<Item = QueryFieldType>, query: impl Into<String>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
            query: query.into(),
        }
    }
}

/// Search criteria of a subscription, independent of paging
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub queries: Vec<QueryField>,
    /// Seconds
    pub min_duration: Option<u64>,
    /// Seconds
    pub max_duration: Option<u64>,
    pub include_future: bool,
}

/// One catalog entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultItem {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub description: String,
    /// Unix seconds
    #[serde(default, deserialize_with = "lenient_number")]
    pub timestamp: i64,
    /// Seconds
    #[serde(default, deserialize_with = "lenient_number")]
    pub duration: i64,
    #[serde(default, deserialize_with = "lenient_number")]
    pub size: i64,
    #[serde(default)]
    pub url_video: String,
    #[serde(default)]
    pub url_video_low: String,
    #[serde(default)]
    pub url_video_hd: String,
    #[serde(default)]
    pub url_subtitle: String,
    #[serde(default)]
    pub url_website: String,
}

impl ResultItem {
    /// Video URLs in priority order HD, standard, low. Empty entries included.
    pub fn video_candidates(&self) -> [&str; 3] {
        [
            self.url_video_hd.as_str(),
            self.url_video.as_str(),
            self.url_video_low.as_str(),
        ]
    }

    /// Best non-empty video URL.
    pub fn best_video_url(&self) -> Option<&str> {
        self.video_candidates().into_iter().find(|u| !u.trim().is_empty())
    }

    pub fn has_video_url(&self, url: &str) -> bool {
        self.video_candidates()
            .into_iter()
            .any(|candidate| !candidate.is_empty() && candidate.eq_ignore_ascii_case(url))
    }

    pub fn subtitle_url(&self) -> Option<&str> {
        Some(self.url_subtitle.as_str()).filter(|u| !u.trim().is_empty())
    }
}

/// The API sometimes sends numbers as strings or empty strings.
fn lenient_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Int(i64),
        Float(f64),
        Text(String),
        Null(()),
    }

    Ok(match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Int(n) => n,
        NumberOrString::Float(f) => f as i64,
        NumberOrString::Text(s) => s.trim().parse().unwrap_or(0),
        NumberOrString::Null(()) => 0,
    })
}

/// One page of results
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub items: Vec<ResultItem>,
    pub total_results: u64,
}

/// Catalog search seam
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(
        &self,
        query: &SearchQuery,
        offset: usize,
        size: usize,
    ) -> Result<SearchPage, SearchError>;
}
