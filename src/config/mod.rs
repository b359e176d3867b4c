//! Application configuration management

mod subscription;

pub use subscription::{
    AccessibilitySettings, DownloadSettings, MetadataSettings, SearchSettings, SeriesSettings,
    Subscription, load_subscriptions,
};

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::services::mediathek::DEFAULT_API_URL;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// MediathekView API base URL
    pub api_url: String,

    /// Base for subscriptions without their own download path
    pub default_download_path: Option<PathBuf>,

    /// Partial downloads land here before being moved into place
    pub temp_path: PathBuf,

    /// SQLite database path
    pub database_url: String,

    /// JSON file holding the subscription list
    pub subscriptions_file: PathBuf,

    pub download_subtitles: bool,

    /// Parallel download jobs
    pub max_concurrent_downloads: usize,

    /// 0 = unlimited
    pub max_bandwidth_mbits: u64,

    pub ffmpeg_path: String,

    pub ffprobe_path: String,

    /// Seconds before a remote ffprobe run is abandoned
    pub probe_timeout_secs: u64,

    /// Allow plain http stream URLs
    pub allow_http_urls: bool,

    /// Empty = any host
    pub allowed_domains: Vec<String>,

    /// Cron expression for daemon mode
    pub search_schedule: Option<String>,

    pub temp_file_max_age_hours: u64,

    /// Daily deletion of `.strm` files with dead links in daemon mode
    pub enable_strm_cleanup: bool,

    /// `json` or anything else for the compact format
    pub log_format: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_PATH")
            .or_else(|_| env::var("DATABASE_URL"))
            .unwrap_or_else(|_| "./data/mediathek-dl.db".to_string());

        let temp_path = match env::var("TEMP_PATH") {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => dirs::cache_dir()
                .unwrap_or_else(env::temp_dir)
                .join("mediathek-dl"),
        };

        Ok(Self {
            api_url: env::var("MEDIATHEK_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),

            default_download_path: env::var("DEFAULT_DOWNLOAD_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),

            temp_path,

            database_url,

            subscriptions_file: PathBuf::from(
                env::var("SUBSCRIPTIONS_FILE").unwrap_or_else(|_| "./subscriptions.json".to_string()),
            ),

            download_subtitles: env::var("DOWNLOAD_SUBTITLES")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),

            max_concurrent_downloads: env::var("MAX_CONCURRENT_DOWNLOADS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("Invalid MAX_CONCURRENT_DOWNLOADS")?,

            max_bandwidth_mbits: env::var("MAX_BANDWIDTH_MBITS")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .context("Invalid MAX_BANDWIDTH_MBITS")?,

            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),

            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),

            probe_timeout_secs: env::var("PROBE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("Invalid PROBE_TIMEOUT_SECS")?,

            allow_http_urls: env::var("ALLOW_HTTP_URLS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),

            allowed_domains: env::var("ALLOWED_DOMAINS")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),

            search_schedule: env::var("SEARCH_SCHEDULE").ok().filter(|s| !s.trim().is_empty()),

            temp_file_max_age_hours: env::var("TEMP_FILE_MAX_AGE_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .unwrap_or(24),

            enable_strm_cleanup: env::var("ENABLE_STRM_CLEANUP")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),

            log_format: env::var("LOG_FORMAT").ok(),
        })
    }

    /// Bytes per second, `None` when unlimited
    pub fn bandwidth_limit(&self) -> Option<u64> {
        (self.max_bandwidth_mbits > 0).then(|| self.max_bandwidth_mbits * 1_000_000 / 8)
    }

    /// Sanity checks used by `--config-check`
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.api_url).context("MEDIATHEK_API_URL is not a valid URL")?;

        if self.max_concurrent_downloads == 0 {
            anyhow::bail!("MAX_CONCURRENT_DOWNLOADS must be at least 1");
        }

        if let Some(schedule) = &self.search_schedule {
            let fields = schedule.split_whitespace().count();
            if !(6..=7).contains(&fields) {
                anyhow::bail!(
                    "SEARCH_SCHEDULE '{}' must be a 6 or 7 field cron expression (with seconds)",
                    schedule
                );
            }
        }

        Ok(())
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
