//! File adoption
//!
//! Reconciles local video files that were not downloaded by us with their
//! catalog entries. Matches come from history (by path), from a source URL in
//! a MediathekView `.txt` info file, or from fuzzy title/topic similarity
//! boosted by exact numbering.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::history::{HistoryEntry, HistoryStore, NewHistoryEntry};
use super::language::DEFAULT_LANGUAGE;
use super::paths::subscription_base_directory;
use super::scanner::{FileKind, ScannedFile};
use super::search::ResultItem;
use super::subscription_processor::SubscriptionProcessor;
use super::text_utils::{partial_ratio, ratio};
use super::title_parser::ParsedTitle;
use crate::config::Subscription;

/// Multiplier for an exact season/episode match; its reciprocal on mismatch
pub const SERIES_NUMBERING_BOOST: f64 = 1.4;
/// Multiplier for an exact absolute number match; its reciprocal on mismatch
pub const ABSOLUTE_NUMBERING_BOOST: f64 = 1.3;
/// Candidates at or below this score are dropped
pub const MIN_MATCH_SCORE: f64 = 0.1;
pub const MAX_MATCHES: usize = 5;
/// Score of an info-file URL match, clamped to 100 confidence
pub const URL_MATCH_SCORE: f64 = 10.0;

const TITLE_WEIGHT: f64 = 0.7;
const TOPIC_WEIGHT: f64 = 0.3;

static INFO_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)URL\s*(https?://\S+)").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdoptionMatchSource {
    History,
    Url,
    SeriesNumbering,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdoptionMatch {
    pub api_id: String,
    pub api_title: String,
    pub video_url: Option<String>,
    /// 0..=100
    pub confidence: f64,
    pub is_confirmed: bool,
    pub source: AdoptionMatchSource,
}

/// A local video plus its sidecar files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdoptionCandidate {
    /// Path of the video file
    pub id: String,
    pub file_paths: Vec<String>,
    pub matches: Vec<AdoptionMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResultWithInfo {
    pub item: ResultItem,
    pub parsed: ParsedTitle,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdoptionInfo {
    pub candidates: Vec<AdoptionCandidate>,
    pub api_results: Vec<ApiResultWithInfo>,
}

/// A user-confirmed file to catalog item link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAdoptionMapping {
    pub candidate_id: String,
    pub api_id: String,
    pub video_url: Option<String>,
}

pub struct AdoptionService {
    processor: Arc<SubscriptionProcessor>,
    history: Arc<dyn HistoryStore>,
}

impl AdoptionService {
    pub fn new(processor: Arc<SubscriptionProcessor>, history: Arc<dyn HistoryStore>) -> Self {
        Self { processor, history }
    }

    /// Local file groups with ranked matches against the full catalog result set.
    pub async fn candidates(&self, subscription: &Subscription, cancel: &CancellationToken) -> Result<AdoptionInfo> {
        let api_results: Vec<ApiResultWithInfo> = self
            .processor
            .fetch_all(subscription, cancel)
            .await
            .into_iter()
            .map(|item| ApiResultWithInfo {
                parsed: self.processor.parse_item(subscription, &item),
                item,
            })
            .collect();

        let Some(base_dir) = subscription_base_directory(
            subscription,
            self.processor.settings().default_download_path.as_deref(),
        ) else {
            warn!(subscription = %subscription.name, "No download directory for adoption scan");
            return Ok(AdoptionInfo {
                candidates: Vec::new(),
                api_results,
            });
        };

        let scanner = super::scanner::LocalMediaScanner::new(self.processor.parser().clone());
        let scan = scanner.scan(base_dir, Some(subscription.name.clone())).await;
        let history = self.history.by_subscription(subscription.id).await?;

        let (videos, others): (Vec<&ScannedFile>, Vec<&ScannedFile>) = scan
            .files
            .iter()
            .partition(|f| matches!(f.kind, FileKind::Video | FileKind::Strm));

        let mut candidates = Vec::with_capacity(videos.len());
        for video in videos {
            if cancel.is_cancelled() {
                break;
            }

            let related = related_files(&video.path, &others);
            let mut file_paths = vec![video.path.to_string_lossy().into_owned()];
            file_paths.extend(related.iter().map(|f| f.path.to_string_lossy().into_owned()));

            let url_from_info = read_info_url(&related).await;
            let matches = find_matches(video, url_from_info.as_deref(), &api_results, &history);

            candidates.push(AdoptionCandidate {
                id: video.path.to_string_lossy().into_owned(),
                file_paths,
                matches,
            });
        }

        info!(
            subscription = %subscription.name,
            candidates = candidates.len(),
            api_results = api_results.len(),
            "Adoption candidates collected"
        );

        Ok(AdoptionInfo {
            candidates,
            api_results,
        })
    }

    /// Record `candidate_id` as the download of `api_id`.
    pub async fn set_api_id(
        &self,
        subscription: &Subscription,
        candidate_id: &str,
        api_id: &str,
        video_url: Option<&str>,
    ) -> Result<()> {
        let title = Path::new(candidate_id)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.history
            .add(NewHistoryEntry {
                video_url: video_url
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("adopted://{}", api_id)),
                item_id: api_id.to_string(),
                subscription_id: subscription.id,
                download_path: candidate_id.to_string(),
                title,
                language: DEFAULT_LANGUAGE.to_string(),
            })
            .await?;

        info!(subscription = %subscription.name, file = %candidate_id, api_id = %api_id, "Adopted file");
        Ok(())
    }

    pub async fn set_mappings(&self, subscription: &Subscription, mappings: &[FileAdoptionMapping]) -> Result<()> {
        for mapping in mappings {
            self.set_api_id(
                subscription,
                &mapping.candidate_id,
                &mapping.api_id,
                mapping.video_url.as_deref(),
            )
            .await?;
        }
        Ok(())
    }
}

/// Non-media files whose name starts with the video's stem.
fn related_files<'a>(video: &Path, others: &[&'a ScannedFile]) -> Vec<&'a ScannedFile> {
    let Some(stem) = video.file_stem().map(|s| s.to_string_lossy().to_lowercase()) else {
        return Vec::new();
    };

    others
        .iter()
        .copied()
        .filter(|f| {
            f.path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().to_lowercase().starts_with(&stem))
        })
        .collect()
}

async fn read_info_url(related: &[&ScannedFile]) -> Option<String> {
    for file in related.iter().filter(|f| f.kind == FileKind::Info) {
        let is_txt = file
            .path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("txt"));
        if !is_txt {
            continue;
        }

        match tokio::fs::read_to_string(&file.path).await {
            Ok(content) => {
                if let Some(url) = extract_info_url(&content) {
                    return Some(url);
                }
            }
            Err(e) => warn!(path = %file.path.display(), error = %e, "Failed to read info file"),
        }
    }
    None
}

pub fn extract_info_url(content: &str) -> Option<String> {
    INFO_URL
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Ranked matches for one local video, at most [`MAX_MATCHES`].
pub fn find_matches(
    video: &ScannedFile,
    url_from_info: Option<&str>,
    api_results: &[ApiResultWithInfo],
    history: &[HistoryEntry],
) -> Vec<AdoptionMatch> {
    let mut matches = Vec::new();
    let video_path = video.path.to_string_lossy();

    if let Some(entry) = history
        .iter()
        .find(|h| h.download_path == video_path && !h.item_id.is_empty())
    {
        matches.push(AdoptionMatch {
            api_id: entry.item_id.clone(),
            api_title: entry.title.clone(),
            video_url: Some(entry.video_url.clone()).filter(|u| !u.is_empty()),
            confidence: 100.0,
            is_confirmed: true,
            source: AdoptionMatchSource::History,
        });
    }

    if let Some(local) = &video.parsed {
        let mut scored: Vec<(&ApiResultWithInfo, f64, AdoptionMatchSource)> = api_results
            .iter()
            .map(|api| {
                let (score, source) = score_match(local, api, url_from_info);
                (api, score, source)
            })
            .filter(|(_, score, _)| *score > MIN_MATCH_SCORE)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        for (api, score, source) in scored.into_iter().take(MAX_MATCHES) {
            if matches.iter().any(|m| m.api_id == api.item.id) {
                continue;
            }
            matches.push(AdoptionMatch {
                api_id: api.item.id.clone(),
                api_title: api.item.title.clone(),
                video_url: url_from_info
                    .map(str::to_string)
                    .or_else(|| api.item.best_video_url().map(str::to_string)),
                confidence: (score * 100.0).min(100.0),
                is_confirmed: false,
                source,
            });
        }
    }

    matches.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    matches.truncate(MAX_MATCHES);
    matches
}

/// Raw score of a local title against one catalog item.
pub fn score_match(
    local: &ParsedTitle,
    api: &ApiResultWithInfo,
    url_from_info: Option<&str>,
) -> (f64, AdoptionMatchSource) {
    if let Some(url) = url_from_info.filter(|u| !u.is_empty()) {
        if api.item.has_video_url(url) {
            return (URL_MATCH_SCORE, AdoptionMatchSource::Url);
        }
    }

    let remote = &api.parsed;
    let local_topic = local.topic.as_deref().unwrap_or_default();
    let remote_topic = remote.topic.as_deref().unwrap_or_default();

    let weighted = [
        (partial_ratio(&local.title, &remote.title), TITLE_WEIGHT),
        (ratio(&local.title, &remote.title), TITLE_WEIGHT),
        (partial_ratio(local_topic, remote_topic), TOPIC_WEIGHT),
        (ratio(local_topic, remote_topic), TOPIC_WEIGHT),
    ];
    let total_weight: f64 = weighted.iter().map(|(_, w)| w).sum();
    let base = weighted.iter().map(|(v, w)| v * w).sum::<f64>() / total_weight;

    let mut multiplier = 1.0;
    let mut source = AdoptionMatchSource::Fuzzy;

    if local.has_season_episode() && remote.has_season_episode() {
        if local.season_number == remote.season_number && local.episode_number == remote.episode_number {
            multiplier *= SERIES_NUMBERING_BOOST;
            source = AdoptionMatchSource::SeriesNumbering;
        } else {
            multiplier /= SERIES_NUMBERING_BOOST;
        }
    }

    if local.has_absolute_numbering() && remote.has_absolute_numbering() {
        if local.absolute_episode_number == remote.absolute_episode_number {
            multiplier *= ABSOLUTE_NUMBERING_BOOST;
            source = AdoptionMatchSource::SeriesNumbering;
        } else {
            multiplier /= ABSOLUTE_NUMBERING_BOOST;
        }
    }

    (base * multiplier, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parsed(title: &str, topic: &str, season: Option<u32>, episode: Option<u32>) -> ParsedTitle {
        ParsedTitle {
            title: title.to_string(),
            topic: Some(topic.to_string()),
            season_number: season,
            episode_number: episode,
            language: "deu".to_string(),
            is_show: season.is_some(),
            ..Default::default()
        }
    }

    fn api(id: &str, parsed: ParsedTitle) -> ApiResultWithInfo {
        ApiResultWithInfo {
            item: ResultItem {
                id: id.to_string(),
                title: parsed.title.clone(),
                url_video: format!("https://cdn/{id}.mp4"),
                ..Default::default()
            },
            parsed,
        }
    }

    #[test]
    fn test_exact_numbering_match_boosts() {
        let local = parsed("Die Bande", "Die Heiland", Some(2), Some(6));
        let (score, source) = score_match(&local, &api("1", local.clone()), None);

        assert!((score - 1.4).abs() < 1e-9);
        assert_eq!(source, AdoptionMatchSource::SeriesNumbering);
    }

    #[test]
    fn test_numbering_mismatch_penalizes() {
        let local = parsed("Die Bande", "Die Heiland", Some(2), Some(6));
        let remote = parsed("Die Bande", "Die Heiland", Some(2), Some(7));
        let (score, source) = score_match(&local, &api("1", remote), None);

        assert!((score - 1.0 / 1.4).abs() < 1e-9);
        assert_eq!(source, AdoptionMatchSource::Fuzzy);
    }

    #[test]
    fn test_absolute_and_series_boosts_stack() {
        let mut local = parsed("Avalon", "Serie", Some(1), Some(1));
        local.absolute_episode_number = Some(98);
        let (score, _) = score_match(&local, &api("1", local.clone()), None);
        assert!((score - 1.4 * 1.3).abs() < 1e-9);
    }

    #[test]
    fn test_url_match_overrides_scoring() {
        let local = parsed("Something else", "Other", None, None);
        let remote = api("42", parsed("Die Bande", "Die Heiland", Some(2), Some(6)));

        let (score, source) = score_match(&local, &remote, Some("HTTPS://cdn/42.mp4"));
        assert_eq!(score, URL_MATCH_SCORE);
        assert_eq!(source, AdoptionMatchSource::Url);
    }

    #[test]
    fn test_extract_info_url() {
        let content = "Sender:      ARD\nURL         https://cdn.example.org/v.mp4\nWebsite     https://ard.de";
        assert_eq!(
            extract_info_url(content).as_deref(),
            Some("https://cdn.example.org/v.mp4")
        );
        assert_eq!(extract_info_url("no link here"), None);
    }

    #[test]
    fn test_find_matches_history_first_and_no_duplicates() {
        let video = ScannedFile {
            path: PathBuf::from("/tv/S02E06 - Die Bande.mkv"),
            kind: FileKind::Video,
            parsed: Some(parsed("Die Bande", "Die Heiland", Some(2), Some(6))),
        };
        let results = vec![
            api("a", parsed("Die Bande", "Die Heiland", Some(2), Some(6))),
            api("b", parsed("Die Bande", "Die Heiland", Some(2), Some(7))),
            api("c", parsed("Völlig anders", "Nichts", None, None)),
        ];
        let history = vec![HistoryEntry {
            id: uuid::Uuid::new_v4(),
            item_id: "a".to_string(),
            subscription_id: uuid::Uuid::new_v4(),
            video_url: "https://cdn/a.mp4".to_string(),
            download_path: "/tv/S02E06 - Die Bande.mkv".to_string(),
            title: "Die Bande".to_string(),
            language: "deu".to_string(),
            created_at: chrono::Utc::now(),
        }];

        let matches = find_matches(&video, None, &results, &history);

        assert_eq!(matches[0].api_id, "a");
        assert_eq!(matches[0].source, AdoptionMatchSource::History);
        assert!(matches[0].is_confirmed);
        assert_eq!(matches.iter().filter(|m| m.api_id == "a").count(), 1);
        assert_eq!(matches[1].api_id, "b");
        assert!(matches.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    }

    #[test]
    fn test_related_files_by_stem() {
        let others = [
            ScannedFile {
                path: PathBuf::from("/tv/S01E01 - A.txt"),
                kind: FileKind::Info,
                parsed: None,
            },
            ScannedFile {
                path: PathBuf::from("/tv/s01e01 - a.deu.ttml"),
                kind: FileKind::Subtitle,
                parsed: None,
            },
            ScannedFile {
                path: PathBuf::from("/tv/S01E02 - B.txt"),
                kind: FileKind::Info,
                parsed: None,
            },
        ];
        let refs: Vec<&ScannedFile> = others.iter().collect();

        let related = related_files(Path::new("/tv/S01E01 - A.mkv"), &refs);
        assert_eq!(related.len(), 2);
    }
}
