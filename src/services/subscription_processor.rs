//! Subscription resolution pipeline
//!
//! Pages through the catalog for one subscription and turns every item that
//! is not owned yet into a [`DownloadJob`]. Per item:
//!
//! 1. history check
//! 2. title parsing plus the original-language override
//! 3. filter cascade (local duplicates, accessibility, series enforcement, extras)
//! 4. destination paths
//! 5. URL candidate selection
//! 6. main item, possibly as a quality upgrade
//! 7. subtitle and NFO siblings

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::download::executor::is_segmented_url;
use super::download::{DownloadItem, DownloadJob, DownloadType};
use super::ffmpeg::{AudioTrackInfo, MediaProber};
use super::history::{HistoryStore, NewHistoryEntry};
use super::language::DEFAULT_LANGUAGE;
use super::local_index::LocalEpisodeCache;
use super::nfo::NfoMetadata;
use super::paths::{DownloadPaths, MediaKind, build_paths, subscription_base_directory};
use super::quality::{QualityCache, QualityChecker};
use super::scanner::LocalMediaScanner;
use super::search::{ResultItem, SearchClient, SearchQuery};
use super::title_parser::{ParsedTitle, TitleParser};
use super::validator::UrlValidator;
use crate::config::Subscription;

/// Results per API page
pub const PAGE_SIZE: usize = 50;
/// Page ceiling per subscription run
pub const MAX_PAGES: usize = 20;

/// Global settings the pipeline needs
#[derive(Debug, Clone, Default)]
pub struct ProcessorSettings {
    pub default_download_path: Option<PathBuf>,
    pub download_subtitles: bool,
}

pub struct SubscriptionProcessor {
    search: Arc<dyn SearchClient>,
    history: Arc<dyn HistoryStore>,
    validator: Arc<dyn UrlValidator>,
    parser: Arc<TitleParser>,
    scanner: LocalMediaScanner,
    quality: QualityChecker,
    settings: ProcessorSettings,
}

impl SubscriptionProcessor {
    pub fn new(
        search: Arc<dyn SearchClient>,
        history: Arc<dyn HistoryStore>,
        validator: Arc<dyn UrlValidator>,
        prober: Arc<dyn MediaProber>,
        quality_cache: Arc<dyn QualityCache>,
        settings: ProcessorSettings,
    ) -> Self {
        let parser = Arc::new(TitleParser::default());
        Self {
            search,
            history,
            validator,
            scanner: LocalMediaScanner::new(parser.clone()),
            parser,
            quality: QualityChecker::new(prober, quality_cache),
            settings,
        }
    }

    pub fn parser(&self) -> &Arc<TitleParser> {
        &self.parser
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Resolve a subscription into download jobs.
    pub async fn process(&self, subscription: &Subscription, cancel: &CancellationToken) -> Vec<DownloadJob> {
        let mut jobs = Vec::new();

        let base_dir = subscription
            .download
            .enhanced_duplicate_detection
            .then(|| subscription_base_directory(subscription, self.settings.default_download_path.as_deref()))
            .flatten();
        let local_cache = match base_dir {
            Some(dir) => Some(self.scanner.scan(dir, Some(subscription.name.clone())).await.episodes),
            None => None,
        };

        let query = subscription.search_query();
        let mut page = 0;
        loop {
            let Some((items, has_more)) = self.fetch_page(subscription, &query, page, cancel).await else {
                break;
            };

            for item in &items {
                if cancel.is_cancelled() {
                    info!(subscription = %subscription.name, "Subscription run cancelled");
                    return jobs;
                }
                if let Some(job) = self.process_item(subscription, item, local_cache.as_ref(), cancel).await {
                    jobs.push(job);
                }
            }

            if !has_more {
                break;
            }
            page += 1;
        }

        info!(subscription = %subscription.name, jobs = jobs.len(), "Subscription processed");
        jobs
    }

    /// Items that pass the filters, without local scanning or history.
    pub async fn test_subscription(&self, subscription: &Subscription, cancel: &CancellationToken) -> Vec<ResultItem> {
        let mut matching = Vec::new();
        for item in self.fetch_all(subscription, cancel).await {
            let parsed = self.parse_item(subscription, &item);
            if !self.matches_criteria(&parsed, subscription, &item, None).await {
                continue;
            }
            if build_paths(&parsed, subscription, self.settings.default_download_path.as_deref()).is_none() {
                continue;
            }
            matching.push(item);
        }
        matching
    }

    /// Every catalog item for a subscription, unfiltered.
    pub async fn fetch_all(&self, subscription: &Subscription, cancel: &CancellationToken) -> Vec<ResultItem> {
        let query = subscription.search_query();
        let mut all = Vec::new();
        let mut page = 0;
        while let Some((items, has_more)) = self.fetch_page(subscription, &query, page, cancel).await {
            all.extend(items);
            if !has_more {
                break;
            }
            page += 1;
        }
        all
    }

    /// One page plus whether another one should be fetched. `None` stops paging.
    async fn fetch_page(
        &self,
        subscription: &Subscription,
        query: &SearchQuery,
        page: usize,
        cancel: &CancellationToken,
    ) -> Option<(Vec<ResultItem>, bool)> {
        if page >= MAX_PAGES || cancel.is_cancelled() {
            return None;
        }

        let result = tokio::select! {
            result = self.search.search(query, page * PAGE_SIZE, PAGE_SIZE) => result,
            _ = cancel.cancelled() => return None,
        };

        match result {
            Ok(result) => {
                let has_more = result.total_results > ((page + 1) * PAGE_SIZE) as u64;
                Some((result.items, has_more))
            }
            Err(e) => {
                warn!(
                    subscription = %subscription.name,
                    error = %e,
                    "Could not retrieve search results for subscription"
                );
                None
            }
        }
    }

    pub fn parse_item(&self, subscription: &Subscription, item: &ResultItem) -> ParsedTitle {
        let topic = Some(subscription.name.as_str()).filter(|n| !n.trim().is_empty());
        self.parser
            .parse(topic, &item.title)
            .with_language_override(subscription.original_language())
    }

    async fn process_item(
        &self,
        subscription: &Subscription,
        item: &ResultItem,
        local_cache: Option<&LocalEpisodeCache>,
        cancel: &CancellationToken,
    ) -> Option<DownloadJob> {
        let in_history = self.in_history(&item.id, subscription).await?;
        if in_history && !subscription.download.auto_upgrade_to_higher_quality {
            debug!(title = %item.title, id = %item.id, "Already processed for subscription");
            return None;
        }

        let parsed = self.parse_item(subscription, item);
        if !self.matches_criteria(&parsed, subscription, item, local_cache).await {
            return None;
        }

        let paths = build_paths(&parsed, subscription, self.settings.default_download_path.as_deref())?;

        let video_url = self.select_url(item, subscription, cancel).await?;

        let main_item = match paths.main_type {
            MediaKind::Strm | MediaKind::Audio => {
                let owned_locally = local_cache.is_some_and(|c| c.contains_title(&parsed));
                if owned_locally || in_history {
                    return None;
                }
                self.plain_item(&video_url, &paths, &parsed)
            }
            MediaKind::Video => {
                let existing = local_cache
                    .and_then(|c| c.existing_file_path(&parsed))
                    .map(Path::to_path_buf)
                    .or_else(|| paths.main_file.is_file().then(|| paths.main_file.clone()))
                    .filter(|p| p.is_file());

                match existing {
                    Some(existing) => {
                        self.upgrade_item(subscription, &existing, &video_url, &paths.main_file, cancel)
                            .await?
                    }
                    None => self.plain_item(&video_url, &paths, &parsed),
                }
            }
        };

        let mut job = DownloadJob {
            item_id: item.id.clone(),
            subscription_id: subscription.id,
            title: parsed.title.clone(),
            parsed: parsed.clone(),
            items: vec![main_item],
            nfo: None,
        };

        if self.settings.download_subtitles {
            if let Some(subtitle_url) = item.subtitle_url() {
                job.items.push(DownloadItem::new(
                    subtitle_url,
                    &paths.subtitle_file,
                    DownloadType::DirectDownload,
                ));
            }
        }

        if subscription.metadata.create_nfo {
            let show = if subscription.name.trim().is_empty() {
                item.topic.clone()
            } else {
                subscription.name.clone()
            };
            job.nfo = Some(NfoMetadata {
                title: parsed.title.clone(),
                show: parsed.season_number.map(|_| show),
                plot: item.description.clone(),
                season: parsed.season_number,
                episode: parsed.episode_number,
                id: item.id.clone(),
                studio: item.channel.clone(),
                timestamp: item.timestamp,
                file_path: paths.nfo_file.clone(),
            });
        }

        Some(job)
    }

    /// `None` when the history store fails; the item is skipped then.
    async fn in_history(&self, item_id: &str, subscription: &Subscription) -> Option<bool> {
        match self.history.exists(item_id, subscription.id).await {
            Ok(exists) => Some(exists),
            Err(e) => {
                warn!(id = %item_id, error = %e, "History lookup failed, skipping item");
                None
            }
        }
    }

    fn plain_item(&self, video_url: &str, paths: &DownloadPaths, parsed: &ParsedTitle) -> DownloadItem {
        match paths.main_type {
            MediaKind::Strm => DownloadItem::new(video_url, &paths.main_file, DownloadType::StreamingUrl),
            MediaKind::Audio => DownloadItem {
                audio: Some(AudioTrackInfo {
                    language: parsed.language.clone(),
                    original_language: parsed.language != DEFAULT_LANGUAGE,
                    audio_description: parsed.has_audio_description,
                }),
                ..DownloadItem::new(video_url, &paths.main_file, DownloadType::AudioExtraction)
            },
            MediaKind::Video => {
                let job_type = if is_segmented_url(video_url) {
                    DownloadType::SegmentedStreamDownload
                } else {
                    DownloadType::DirectDownload
                };
                DownloadItem::new(video_url, &paths.main_file, job_type)
            }
        }
    }

    async fn upgrade_item(
        &self,
        subscription: &Subscription,
        existing: &Path,
        video_url: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Option<DownloadItem> {
        if !subscription.download.auto_upgrade_to_higher_quality || cancel.is_cancelled() {
            return None;
        }

        let existing_str = existing.to_string_lossy();
        if !self.quality.is_upgrade_available(&existing_str, video_url).await {
            return None;
        }

        Some(DownloadItem {
            replaces: (existing != destination).then(|| existing.to_path_buf()),
            ..DownloadItem::new(video_url, destination, DownloadType::QualityUpgrade)
        })
    }

    /// Filter cascade. Returns false for items that must not be downloaded.
    async fn matches_criteria(
        &self,
        parsed: &ParsedTitle,
        subscription: &Subscription,
        item: &ResultItem,
        local_cache: Option<&LocalEpisodeCache>,
    ) -> bool {
        let series = &subscription.series;
        let accessibility = &subscription.accessibility;

        if let Some(cache) = local_cache {
            if cache.contains_title(parsed) && !subscription.download.auto_upgrade_to_higher_quality {
                info!(
                    title = %item.title,
                    season = ?parsed.season_number,
                    episode = ?parsed.episode_number,
                    absolute = ?parsed.absolute_episode_number,
                    "Skipping item found locally"
                );
                let local_path = cache
                    .existing_file_path(parsed)
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let entry = NewHistoryEntry {
                    video_url: String::new(),
                    item_id: item.id.clone(),
                    subscription_id: subscription.id,
                    download_path: local_path,
                    title: item.title.clone(),
                    language: parsed.language.clone(),
                };
                if let Err(e) = self.history.add(entry).await {
                    warn!(id = %item.id, error = %e, "Failed to record local copy in history");
                }
                return false;
            }
        }

        if !accessibility.allow_audio_description && parsed.has_audio_description {
            debug!(title = %item.title, "Skipping audio description variant");
            return false;
        }

        if !accessibility.allow_sign_language && parsed.has_sign_language {
            debug!(title = %item.title, "Skipping sign language variant");
            return false;
        }

        if series.enforce_series_parsing && !parsed.is_show && !series.treat_non_episodes_as_extras {
            debug!(title = %item.title, "Skipping item without series numbering");
            return false;
        }

        if series.enforce_series_parsing
            && !series.allow_absolute_episode_numbering
            && !parsed.has_season_episode()
            && !series.treat_non_episodes_as_extras
            && !parsed.is_show
        {
            debug!(title = %item.title, "Skipping item with absolute numbering only");
            return false;
        }

        if series.treat_non_episodes_as_extras {
            if parsed.is_trailer && !series.save_trailers {
                debug!(title = %item.title, "Skipping trailer");
                return false;
            }
            if parsed.is_interview && !series.save_interviews {
                debug!(title = %item.title, "Skipping interview");
                return false;
            }
            if !parsed.is_trailer && !parsed.is_interview && !parsed.is_show && !series.save_generic_extras {
                debug!(title = %item.title, "Skipping generic extra");
                return false;
            }
        }

        true
    }

    /// Pick the video URL by priority HD, standard, low.
    async fn select_url(&self, item: &ResultItem, subscription: &Subscription, cancel: &CancellationToken) -> Option<String> {
        let download = &subscription.download;

        if !download.allow_fallback_to_lower_quality {
            return Some(item.url_video_hd.clone()).filter(|u| !u.trim().is_empty());
        }

        let mut candidates: Vec<&str> = Vec::new();
        for url in item.video_candidates() {
            if !url.trim().is_empty() && !candidates.contains(&url) {
                candidates.push(url);
            }
        }

        if !download.quality_check_with_url {
            return candidates.first().map(|u| u.to_string());
        }

        for (index, url) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                return None;
            }
            match self.validator.validate(url).await {
                Ok(true) => {
                    if index > 0 {
                        warn!(title = %item.title, url = %url, "Primary quality unavailable, falling back");
                    }
                    return Some(url.to_string());
                }
                Ok(false) => debug!(url = %url, "Candidate URL is not available"),
                Err(e) => warn!(url = %url, title = %item.title, error = %e, "Failed to validate URL, trying next quality"),
            }
        }

        warn!(title = %item.title, "No valid video URL found");
        None
    }
}
