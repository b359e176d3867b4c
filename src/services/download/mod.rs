//! Download jobs and their execution
//!
//! A [`DownloadJob`] groups every file that belongs to one catalog item (main
//! media, subtitle, NFO) so success and failure are observed per item, not per
//! file.

pub mod executor;
pub mod queue;

pub use executor::{DefaultTransferExecutor, TransferExecutor};
pub use queue::{DownloadQueue, DownloadStatus, QueueSummary};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::ffmpeg::AudioTrackInfo;
use super::nfo::NfoMetadata;
use super::title_parser::ParsedTitle;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("verification failed: {0}")]
    Verification(String),
}

impl From<reqwest::Error> for TransferError {
    fn from(e: reqwest::Error) -> Self {
        TransferError::Http(e.to_string())
    }
}

/// How an item is transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadType {
    DirectDownload,
    AudioExtraction,
    /// Write the URL into a `.strm` file
    StreamingUrl,
    /// Replace an existing file with a better one
    QualityUpgrade,
    /// HLS manifest fetched through ffmpeg
    SegmentedStreamDownload,
}

impl std::fmt::Display for DownloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DownloadType::DirectDownload => "direct_download",
            DownloadType::AudioExtraction => "audio_extraction",
            DownloadType::StreamingUrl => "streaming_url",
            DownloadType::QualityUpgrade => "quality_upgrade",
            DownloadType::SegmentedStreamDownload => "segmented_stream_download",
        };
        write!(f, "{}", name)
    }
}

/// One file to produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub source_url: String,
    pub destination_path: PathBuf,
    pub job_type: DownloadType,
    /// File replaced by a quality upgrade when it differs from the destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<PathBuf>,
    /// Track tagging for audio extraction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioTrackInfo>,
}

impl DownloadItem {
    pub fn new(source_url: impl Into<String>, destination_path: impl Into<PathBuf>, job_type: DownloadType) -> Self {
        Self {
            source_url: source_url.into(),
            destination_path: destination_path.into(),
            job_type,
            replaces: None,
            audio: None,
        }
    }
}

/// Every file for one catalog item, executed as a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadJob {
    pub item_id: String,
    pub subscription_id: Uuid,
    pub title: String,
    pub parsed: ParsedTitle,
    pub items: Vec<DownloadItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfo: Option<NfoMetadata>,
}

impl DownloadJob {
    /// The main media item; history is recorded against it.
    pub fn main_item(&self) -> Option<&DownloadItem> {
        self.items.first()
    }
}
