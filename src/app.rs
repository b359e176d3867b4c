//! Application wiring
//!
//! Builds the concrete collaborators from [Config] and hands out the
//! services the CLI commands need.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, Subscription, load_subscriptions};
use crate::db::Database;
use crate::jobs::StrmCleanup;
use crate::services::adoption::AdoptionService;
use crate::services::download::{DefaultTransferExecutor, DownloadQueue};
use crate::services::ffmpeg::FfmpegService;
use crate::services::history::HistoryStore;
use crate::services::mediathek::MediathekClient;
use crate::services::runner::SubscriptionRunner;
use crate::services::subscription_processor::{ProcessorSettings, SubscriptionProcessor};
use crate::services::validator::{HttpUrlValidator, UrlPolicy, UrlValidator};

/// Shared state for all commands
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub ffmpeg: Arc<FfmpegService>,
    pub history: Arc<dyn HistoryStore>,
    pub validator: Arc<dyn UrlValidator>,
    pub processor: Arc<SubscriptionProcessor>,
}

impl AppState {
    pub async fn build(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        let db = Database::connect(&config.database_url).await?;
        let history: Arc<dyn HistoryStore> = Arc::new(db.history());

        let search = Arc::new(
            MediathekClient::new(config.api_url.clone(), config.allow_http_urls)
                .context("Failed to create search client")?,
        );
        let validator: Arc<dyn UrlValidator> = Arc::new(
            HttpUrlValidator::new(UrlPolicy {
                allow_http: config.allow_http_urls,
                allowed_domains: config.allowed_domains.clone(),
            })
            .context("Failed to create URL validator")?,
        );
        let ffmpeg = Arc::new(
            FfmpegService::new(config.ffmpeg_path.clone(), config.ffprobe_path.clone())
                .with_probe_timeout(Duration::from_secs(config.probe_timeout_secs)),
        );

        if !ffmpeg.is_available().await {
            tracing::warn!(
                ffmpeg = %config.ffmpeg_path,
                "ffmpeg/ffprobe not available; quality checks and audio extraction will fail"
            );
        }

        let processor = Arc::new(SubscriptionProcessor::new(
            search,
            history.clone(),
            validator.clone(),
            ffmpeg.clone(),
            Arc::new(db.quality_cache()),
            ProcessorSettings {
                default_download_path: config.default_download_path.clone(),
                download_subtitles: config.download_subtitles,
            },
        ));

        Ok(Self {
            config,
            db,
            ffmpeg,
            history,
            validator,
            processor,
        })
    }

    pub fn runner(&self) -> SubscriptionRunner {
        SubscriptionRunner::new(self.processor.clone())
    }

    pub fn adoption(&self) -> AdoptionService {
        AdoptionService::new(self.processor.clone(), self.history.clone())
    }

    pub fn download_queue(&self) -> Result<DownloadQueue> {
        let executor = DefaultTransferExecutor::new(
            self.ffmpeg.clone(),
            self.config.temp_path.clone(),
            self.config.bandwidth_limit(),
        )
        .context("Failed to create transfer executor")?;

        Ok(DownloadQueue::new(
            Arc::new(executor),
            self.history.clone(),
            self.config.max_concurrent_downloads,
        ))
    }

    pub fn strm_cleanup(&self, cancel: CancellationToken) -> StrmCleanup {
        StrmCleanup::new(
            self.validator.clone(),
            self.config.subscriptions_file.clone(),
            self.config.default_download_path.clone(),
            cancel,
        )
    }

    pub async fn subscriptions(&self) -> Result<Vec<Subscription>> {
        load_subscriptions(&self.config.subscriptions_file).await
    }

    /// Look up a subscription by id or exact name
    pub async fn find_subscription(&self, key: &str) -> Result<Subscription> {
        let subscriptions = self.subscriptions().await?;
        find_subscription(&subscriptions, key)
            .cloned()
            .with_context(|| format!("No subscription with id or name '{}'", key))
    }
}

pub fn find_subscription<'a>(subscriptions: &'a [Subscription], key: &str) -> Option<&'a Subscription> {
    subscriptions
        .iter()
        .find(|s| s.id.to_string().eq_ignore_ascii_case(key))
        .or_else(|| subscriptions.iter().find(|s| s.name == key))
}
