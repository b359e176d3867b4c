//! MediathekView search API client
//!
//! Base URL: https://mediathekviewweb.de/api
//! Queries are `POST /query` with a JSON body; results are newest first.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::retry::{Attempt, RetryConfig, is_transient_error, is_transient_status, retry_async};
use super::search::{QueryField, ResultItem, SearchClient, SearchError, SearchPage, SearchQuery};

pub const DEFAULT_API_URL: &str = "https://mediathekviewweb.de/api";

/// Request body for `/query`
#[derive(Debug, Clone, Serialize)]
struct ApiQuery<'a> {
    queries: &'a [QueryField],
    #[serde(rename = "sortBy")]
    sort_by: &'static str,
    #[serde(rename = "sortOrder")]
    sort_order: &'static str,
    future: bool,
    offset: usize,
    size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_min: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_max: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    result: Option<ApiResult>,
    err: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiResult {
    #[serde(default)]
    results: Vec<ResultItem>,
    #[serde(rename = "queryInfo")]
    query_info: QueryInfo,
}

#[derive(Debug, Deserialize)]
struct QueryInfo {
    #[serde(rename = "totalResults", default)]
    total_results: u64,
}

/// MediathekView API client
pub struct MediathekClient {
    client: Client,
    base_url: String,
    retry: RetryConfig,
    upgrade_to_https: bool,
}

impl MediathekClient {
    pub fn new(base_url: impl Into<String>, allow_http: bool) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("mediathek-dl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SearchError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
            upgrade_to_https: !allow_http,
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn post_query(&self, body: &ApiQuery<'_>) -> Attempt<ApiResponse, SearchError> {
        let url = format!("{}/query", self.base_url);

        let response = match self.client.post(&url).json(body).send().await {
            Ok(response) => response,
            Err(e) if is_transient_error(&e) => {
                return Attempt::Transient(SearchError::Connection(e.to_string()));
            }
            Err(e) => return Attempt::Permanent(SearchError::Connection(e.to_string())),
        };

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let error = SearchError::Api {
                status: status.as_u16(),
                message,
            };
            return if is_transient_status(status) {
                Attempt::Transient(error)
            } else {
                Attempt::Permanent(error)
            };
        }

        match response.json::<ApiResponse>().await {
            Ok(parsed) => Attempt::Done(parsed),
            Err(e) => Attempt::Permanent(SearchError::Parse(e.to_string())),
        }
    }

    fn normalize_item(&self, mut item: ResultItem) -> ResultItem {
        if self.upgrade_to_https {
            for url in [
                &mut item.url_video,
                &mut item.url_video_low,
                &mut item.url_video_hd,
                &mut item.url_subtitle,
            ] {
                if let Some(rest) = url.strip_prefix("http://") {
                    *url = format!("https://{}", rest);
                }
            }
        }
        item
    }
}

#[async_trait]
impl SearchClient for MediathekClient {
    async fn search(
        &self,
        query: &SearchQuery,
        offset: usize,
        size: usize,
    ) -> Result<SearchPage, SearchError> {
        let body = ApiQuery {
            queries: &query.queries,
            sort_by: "timestamp",
            sort_order: "desc",
            future: query.include_future,
            offset,
            size,
            duration_min: query.min_duration,
            duration_max: query.max_duration,
        };

        debug!(offset = offset, size = size, queries = query.queries.len(), "Searching MediathekView");

        let response = retry_async(|| self.post_query(&body), &self.retry, "mediathek_search").await?;

        if let Some(err) = response.err.filter(|e| !e.is_null()) {
            return Err(SearchError::Api {
                status: 200,
                message: err.to_string(),
            });
        }

        let result = response
            .result
            .ok_or_else(|| SearchError::Parse("response has no result".to_string()))?;

        info!(
            count = result.results.len(),
            total = result.query_info.total_results,
            "MediathekView search returned results"
        );

        Ok(SearchPage {
            items: result
                .results
                .into_iter()
                .map(|item| self.normalize_item(item))
                .collect(),
            total_results: result.query_info.total_results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::search::QueryFieldType;

    #[test]
    fn test_query_body_shape() {
        let queries = vec![QueryField::new([QueryFieldType::Topic], "Tatort")];
        let body = ApiQuery {
            queries: &queries,
            sort_by: "timestamp",
            sort_order: "desc",
            future: false,
            offset: 50,
            size: 50,
            duration_min: Some(1200),
            duration_max: None,
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["sortBy"], "timestamp");
        assert_eq!(json["sortOrder"], "desc");
        assert_eq!(json["offset"], 50);
        assert_eq!(json["duration_min"], 1200);
        assert!(json.get("duration_max").is_none());
        assert_eq!(json["queries"][0]["fields"][0], "topic");
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{
            "result": {
                "results": [{"id": "1", "title": "A", "url_video": "http://x/a.mp4"}],
                "queryInfo": {"totalResults": 120, "resultCount": 1}
            },
            "err": null
        }"#;
        let parsed: ApiResponse = serde_json::from_str(json).unwrap();
        let result = parsed.result.unwrap();
        assert_eq!(result.query_info.total_results, 120);
        assert_eq!(result.results[0].id, "1");
    }

    #[test]
    fn test_http_urls_are_upgraded() {
        let client = MediathekClient::new(DEFAULT_API_URL, false).unwrap();
        let item = client.normalize_item(ResultItem {
            id: "1".into(),
            url_video: "http://cdn/v.mp4".into(),
            url_video_hd: "https://cdn/hd.mp4".into(),
            ..Default::default()
        });
        assert_eq!(item.url_video, "https://cdn/v.mp4");
        assert_eq!(item.url_video_hd, "https://cdn/hd.mp4");

        let permissive = MediathekClient::new(DEFAULT_API_URL, true).unwrap();
        let item = permissive.normalize_item(ResultItem {
            url_video: "http://cdn/v.mp4".into(),
            ..Default::default()
        });
        assert_eq!(item.url_video, "http://cdn/v.mp4");
    }
}
