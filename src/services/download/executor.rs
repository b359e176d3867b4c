//! Transfer executor
//!
//! Every transfer writes to a temp file first and is moved into place only
//! when it completed. Quality upgrades keep the old file aside until the new
//! one is in place and restore it on any failure.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{DownloadItem, DownloadType, TransferError};
use crate::services::ffmpeg::{AudioTrackInfo, FfmpegService};
use crate::services::language::DEFAULT_LANGUAGE;

/// Suffix marking our partial files in the temp directory
pub const TEMP_FILE_SUFFIX: &str = ".mdl-tmp";

/// Transfer seam
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    async fn execute(&self, item: &DownloadItem, cancel: &CancellationToken) -> Result<(), TransferError>;
}

/// Byte-rate cap shared by every transfer of one executor.
///
/// One cell of the quota is one byte; the burst equals one second of traffic.
pub struct BandwidthLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    burst: NonZeroU32,
}

impl BandwidthLimiter {
    /// `None` for a zero limit.
    pub fn new(bytes_per_second: u64) -> Option<Self> {
        let burst = NonZeroU32::new(u32::try_from(bytes_per_second).unwrap_or(u32::MAX))?;
        Some(Self {
            limiter: RateLimiter::direct(Quota::per_second(burst)),
            burst,
        })
    }

    /// Wait until `bytes` may pass. Amounts above the burst are taken in slices.
    pub async fn acquire(&self, bytes: usize, cancel: &CancellationToken) -> Result<(), TransferError> {
        let mut remaining = bytes;
        while remaining > 0 {
            let slice = remaining.min(self.burst.get() as usize);
            let Some(cells) = NonZeroU32::new(slice as u32) else { break };

            tokio::select! {
                ready = self.limiter.until_n_ready(cells) => {
                    ready.map_err(|e| TransferError::Http(format!("bandwidth limiter: {}", e)))?;
                }
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            }
            remaining -= slice;
        }
        Ok(())
    }
}

/// HTTP and ffmpeg backed executor
pub struct DefaultTransferExecutor {
    client: Client,
    ffmpeg: Arc<FfmpegService>,
    temp_dir: PathBuf,
    bandwidth: Option<BandwidthLimiter>,
}

impl DefaultTransferExecutor {
    /// `bandwidth_limit` is in bytes per second.
    pub fn new(
        ffmpeg: Arc<FfmpegService>,
        temp_dir: impl Into<PathBuf>,
        bandwidth_limit: Option<u64>,
    ) -> Result<Self, TransferError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("mediathek-dl/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            ffmpeg,
            temp_dir: temp_dir.into(),
            bandwidth: bandwidth_limit.and_then(BandwidthLimiter::new),
        })
    }

    async fn temp_file_path(&self, extension: &str) -> Result<PathBuf, TransferError> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        Ok(self
            .temp_dir
            .join(format!("{}.{}{}", Uuid::new_v4(), extension, TEMP_FILE_SUFFIX)))
    }

    /// Run `transfer` into a fresh temp file and move the result to `destination`.
    async fn via_temp<F, Fut>(&self, destination: &Path, extension: &str, transfer: F) -> Result<(), TransferError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: std::future::Future<Output = Result<(), TransferError>>,
    {
        let temp = self.temp_file_path(extension).await?;
        let result = match transfer(temp.clone()).await {
            Ok(()) => move_file(&temp, destination).await,
            Err(e) => Err(e),
        };
        remove_if_exists(&temp).await;
        result
    }

    /// Stream `url` into `target`, honoring the bandwidth cap and cancellation.
    async fn download_to(&self, url: &str, target: &Path, cancel: &CancellationToken) -> Result<(), TransferError> {
        let response = tokio::select! {
            response = self.client.get(url).send() => response?,
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Http(format!("{} returned status {}", url, status)));
        }

        let expected = response.content_length();
        let mut file = tokio::fs::File::create(target).await?;
        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        let started = Instant::now();

        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => chunk,
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;

            file.write_all(&chunk).await?;
            received += chunk.len() as u64;

            if let Some(bandwidth) = &self.bandwidth {
                bandwidth.acquire(chunk.len(), cancel).await?;
            }
        }

        file.flush().await?;
        drop(file);

        if let Some(total) = expected {
            if received < total {
                return Err(TransferError::Verification(format!(
                    "incomplete download: received {} of {} bytes",
                    received, total
                )));
            }
        }

        debug!(url = %url, bytes = received, elapsed_ms = started.elapsed().as_millis() as u64, "Download finished");
        Ok(())
    }

    /// Direct or segmented fetch depending on the URL.
    async fn fetch_video(&self, url: &str, target: &Path, cancel: &CancellationToken) -> Result<(), TransferError> {
        if is_segmented_url(url) {
            self.ffmpeg.download_segmented(url, target, cancel).await
        } else {
            self.download_to(url, target, cancel).await
        }
    }

    async fn quality_upgrade(&self, item: &DownloadItem, cancel: &CancellationToken) -> Result<(), TransferError> {
        let destination = item.destination_path.as_path();
        let to_replace = item.replaces.as_deref().unwrap_or(destination);

        let temp = self.temp_file_path("mkv").await?;
        let result = async {
            self.fetch_video(&item.source_url, &temp, cancel).await?;
            replace_if_larger(&temp, to_replace, destination, cancel).await
        }
        .await;

        remove_if_exists(&temp).await;
        result
    }
}

/// Swap a finished upgrade download in, provided it is strictly larger than the old file.
async fn replace_if_larger(
    new_file: &Path,
    old_file: &Path,
    destination: &Path,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    let new_size = tokio::fs::metadata(new_file).await?.len();
    let old_size = tokio::fs::metadata(old_file).await?.len();
    if new_size <= old_size {
        return Err(TransferError::Verification(format!(
            "downloaded file ({} bytes) is not larger than {} ({} bytes)",
            new_size,
            old_file.display(),
            old_size
        )));
    }

    if cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }

    info!(
        old = %old_file.display(),
        new = %destination.display(),
        old_size = old_size,
        new_size = new_size,
        "Replacing file with higher quality download"
    );
    swap_in(new_file, old_file, destination).await
}

#[async_trait]
impl TransferExecutor for DefaultTransferExecutor {
    async fn execute(&self, item: &DownloadItem, cancel: &CancellationToken) -> Result<(), TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let destination = item.destination_path.as_path();
        if item.job_type != DownloadType::QualityUpgrade && tokio::fs::try_exists(destination).await.unwrap_or(false) {
            debug!(path = %destination.display(), "File already exists, skipping");
            return Ok(());
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(job_type = %item.job_type, path = %destination.display(), "Processing download item");

        match item.job_type {
            DownloadType::DirectDownload => {
                let extension = extension_of(destination);
                self.via_temp(destination, &extension, |temp| async move {
                    self.download_to(&item.source_url, &temp, cancel).await
                })
                .await
            }
            DownloadType::SegmentedStreamDownload => {
                self.via_temp(destination, "mkv", |temp| async move {
                    self.ffmpeg.download_segmented(&item.source_url, &temp, cancel).await
                })
                .await
            }
            DownloadType::AudioExtraction => {
                let track = item.audio.clone().unwrap_or_else(|| AudioTrackInfo {
                    language: DEFAULT_LANGUAGE.to_string(),
                    original_language: false,
                    audio_description: false,
                });
                self.via_temp(destination, "mka", |temp| async move {
                    self.ffmpeg.extract_audio(&item.source_url, &temp, &track, cancel).await
                })
                .await
            }
            DownloadType::StreamingUrl => {
                tokio::fs::write(destination, item.source_url.as_bytes()).await?;
                Ok(())
            }
            DownloadType::QualityUpgrade => self.quality_upgrade(item, cancel).await,
        }
    }
}

/// Move `new_file` to `destination`, keeping `old_file` aside until that succeeded.
async fn swap_in(new_file: &Path, old_file: &Path, destination: &Path) -> Result<(), TransferError> {
    let backup = PathBuf::from(format!("{}.{}.bak", old_file.display(), Uuid::new_v4()));

    tokio::fs::rename(old_file, &backup).await?;

    if let Err(e) = move_file(new_file, destination).await {
        error!(error = %e, path = %old_file.display(), "Upgrade failed, restoring original file");
        if let Err(restore) = tokio::fs::rename(&backup, old_file).await {
            error!(error = %restore, backup = %backup.display(), "Could not restore original file");
        }
        return Err(e);
    }

    if let Err(e) = tokio::fs::remove_file(&backup).await {
        warn!(error = %e, backup = %backup.display(), "Failed to delete backup after upgrade");
    }
    Ok(())
}

/// Rename, falling back to copy and delete across file systems.
async fn move_file(from: &Path, to: &Path) -> Result<(), TransferError> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(error = %e, path = %path.display(), "Failed to delete temporary file");
        }
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bin".to_string())
}

pub fn is_segmented_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.to_ascii_lowercase().ends_with(".m3u8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn executor(dir: &TempDir) -> DefaultTransferExecutor {
        DefaultTransferExecutor::new(Arc::new(FfmpegService::default()), dir.path().join("tmp"), None).unwrap()
    }

    #[test]
    fn test_segmented_url_detection() {
        assert!(is_segmented_url("https://cdn/master.m3u8"));
        assert!(is_segmented_url("https://cdn/master.M3U8?token=1"));
        assert!(!is_segmented_url("https://cdn/video.mp4"));
    }

    #[test]
    fn test_zero_bandwidth_is_unlimited() {
        assert!(BandwidthLimiter::new(0).is_none());
        assert!(BandwidthLimiter::new(u64::MAX).is_some());
    }

    #[tokio::test]
    async fn test_bandwidth_limiter_paces_after_burst() {
        let limiter = BandwidthLimiter::new(1_000).unwrap();
        let cancel = CancellationToken::new();

        // First second of traffic passes at once
        let started = Instant::now();
        limiter.acquire(1_000, &cancel).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));

        let started = Instant::now();
        limiter.acquire(300, &cancel).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_bandwidth_limiter_splits_chunks_above_burst() {
        let limiter = BandwidthLimiter::new(100).unwrap();
        let started = Instant::now();
        limiter.acquire(150, &CancellationToken::new()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_bandwidth_limiter_honors_cancel() {
        let limiter = BandwidthLimiter::new(10).unwrap();
        let cancel = CancellationToken::new();
        limiter.acquire(10, &cancel).await.unwrap();

        cancel.cancel();
        assert_matches!(limiter.acquire(10, &cancel).await, Err(TransferError::Cancelled));
    }

    #[tokio::test]
    async fn test_streaming_url_writes_strm() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("Staffel 1").join("S01E01 - A.strm");
        let item = DownloadItem::new("https://cdn/a.mp4", &dest, DownloadType::StreamingUrl);

        executor(&dir).execute(&item, &CancellationToken::new()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "https://cdn/a.mp4");
    }

    #[tokio::test]
    async fn test_existing_destination_is_skipped() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("A.strm");
        std::fs::write(&dest, "old").unwrap();

        let item = DownloadItem::new("https://cdn/new.mp4", &dest, DownloadType::StreamingUrl);
        executor(&dir).execute(&item, &CancellationToken::new()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "old");
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let item = DownloadItem::new("https://cdn/a.mp4", dir.path().join("a.mkv"), DownloadType::DirectDownload);
        assert_matches!(executor(&dir).execute(&item, &token).await, Err(TransferError::Cancelled));
    }

    #[tokio::test]
    async fn test_smaller_upgrade_is_rejected() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("S01E01 - A.mkv");
        let new = dir.path().join("new.tmp");
        std::fs::write(&old, "original content").unwrap();
        std::fs::write(&new, "tiny").unwrap();

        let result = replace_if_larger(&new, &old, &old, &CancellationToken::new()).await;

        assert_matches!(result, Err(TransferError::Verification(_)));
        assert_eq!(std::fs::read_to_string(&old).unwrap(), "original content");
        assert!(new.exists());
    }

    #[tokio::test]
    async fn test_equal_size_upgrade_is_rejected() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("S01E01 - A.mkv");
        let new = dir.path().join("new.tmp");
        std::fs::write(&old, "same").unwrap();
        std::fs::write(&new, "size").unwrap();

        assert_matches!(
            replace_if_larger(&new, &old, &old, &CancellationToken::new()).await,
            Err(TransferError::Verification(_))
        );
    }

    #[tokio::test]
    async fn test_larger_upgrade_replaces_file() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("S01E01 - A.mp4");
        let dest = dir.path().join("S01E01 - A.mkv");
        let new = dir.path().join("new.tmp");
        std::fs::write(&old, "small").unwrap();
        std::fs::write(&new, "much larger content").unwrap();

        replace_if_larger(&new, &old, &dest, &CancellationToken::new()).await.unwrap();

        assert!(!old.exists());
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "much larger content");
    }

    #[tokio::test]
    async fn test_swap_in_replaces_and_removes_backup() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("S01E01 - A.mkv");
        let new = dir.path().join("new.tmp");
        std::fs::write(&old, "small").unwrap();
        std::fs::write(&new, "much larger content").unwrap();

        swap_in(&new, &old, &old).await.unwrap();

        assert_eq!(std::fs::read_to_string(&old).unwrap(), "much larger content");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_swap_in_restores_on_failure() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("S01E01 - A.mkv");
        std::fs::write(&old, "original").unwrap();

        let missing = dir.path().join("does-not-exist.tmp");
        assert!(swap_in(&missing, &old, &old).await.is_err());
        assert_eq!(std::fs::read_to_string(&old).unwrap(), "original");
    }

    #[tokio::test]
    async fn test_swap_in_with_renamed_destination() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("S01E01 - A.mp4");
        let dest = dir.path().join("S01E01 - A.mkv");
        let new = dir.path().join("new.tmp");
        std::fs::write(&old, "small").unwrap();
        std::fs::write(&new, "much larger content").unwrap();

        swap_in(&new, &old, &dest).await.unwrap();

        assert!(!old.exists());
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "much larger content");
    }
}
