//! Local media scanner
//!
//! Walks a subscription directory, classifies files by extension and runs the
//! title parser over every media file name to build a [`LocalEpisodeCache`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::local_index::LocalEpisodeCache;
use super::title_parser::{ParsedTitle, TitleParser};

/// Media file extensions we index
pub const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "mov", "wmv", "m4v"];
pub const AUDIO_EXTENSIONS: &[&str] = &["mka"];
pub const STRM_EXTENSIONS: &[&str] = &["strm"];
pub const SUBTITLE_EXTENSIONS: &[&str] = &["vtt", "ttml", "srt"];
pub const INFO_EXTENSIONS: &[&str] = &["txt", "nfo"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Video,
    Audio,
    Strm,
    Subtitle,
    Info,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        let ext = ext.as_str();
        if VIDEO_EXTENSIONS.contains(&ext) {
            Some(Self::Video)
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            Some(Self::Audio)
        } else if STRM_EXTENSIONS.contains(&ext) {
            Some(Self::Strm)
        } else if SUBTITLE_EXTENSIONS.contains(&ext) {
            Some(Self::Subtitle)
        } else if INFO_EXTENSIONS.contains(&ext) {
            Some(Self::Info)
        } else {
            None
        }
    }

    /// Files that represent an episode on their own.
    pub fn is_media(self) -> bool {
        matches!(self, Self::Video | Self::Audio | Self::Strm)
    }
}

/// A file found during a scan
#[derive(Debug, Clone, Serialize)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub kind: FileKind,
    /// Parsed name, only for media files
    pub parsed: Option<ParsedTitle>,
}

/// Every classified file plus the episode index built from the media ones
#[derive(Debug, Clone, Default)]
pub struct LocalScanResult {
    pub files: Vec<ScannedFile>,
    pub episodes: LocalEpisodeCache,
}

/// Scans subscription directories
#[derive(Debug, Clone)]
pub struct LocalMediaScanner {
    parser: Arc<TitleParser>,
}

impl LocalMediaScanner {
    pub fn new(parser: Arc<TitleParser>) -> Self {
        Self { parser }
    }

    /// [`scan_directory`](Self::scan_directory) on the blocking pool.
    pub async fn scan(&self, directory: PathBuf, series: Option<String>) -> LocalScanResult {
        let scanner = self.clone();
        let task = tokio::task::spawn_blocking(move || scanner.scan_directory(&directory, series.as_deref()));
        match task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Local scan task failed");
                LocalScanResult::default()
            }
        }
    }

    /// Classify every file under `directory` and index the media files.
    pub fn scan_directory(&self, directory: &Path, series: Option<&str>) -> LocalScanResult {
        let mut result = LocalScanResult::default();

        if !directory.is_dir() {
            warn!(path = %directory.display(), "Scan directory does not exist");
            return result;
        }

        for entry in WalkDir::new(directory)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let Some(kind) = FileKind::from_path(path) else {
                continue;
            };

            let parsed = if kind.is_media() {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let parsed = self.parser.parse_file_name(series, &file_name);

                if parsed.has_season_episode() || parsed.has_absolute_numbering() {
                    result.episodes.add_parsed(&parsed, path);
                } else {
                    debug!(path = %path.display(), "No numbering in local file name");
                }
                Some(parsed)
            } else {
                None
            };

            result.files.push(ScannedFile {
                path: path.to_path_buf(),
                kind,
                parsed,
            });
        }

        info!(
            path = %directory.display(),
            files = result.files.len(),
            season_episodes = result.episodes.season_episode_count(),
            absolute_episodes = result.episodes.absolute_episode_count(),
            "Local scan complete"
        );

        result
    }
}
