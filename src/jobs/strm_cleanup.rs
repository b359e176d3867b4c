//! Dead `.strm` link cleanup
//!
//! Walks the download directories of enabled subscriptions and deletes
//! `.strm` files whose stream URL the broadcaster has taken down.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::config::{Subscription, load_subscriptions};
use crate::services::validator::UrlValidator;

/// Larger files are not URL stubs and are never touched
pub const MAX_STRM_FILE_SIZE: u64 = 4096;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StrmCleanupSummary {
    pub processed: usize,
    pub deleted: usize,
    pub skipped: usize,
}

pub struct StrmCleanup {
    validator: Arc<dyn UrlValidator>,
    subscriptions_file: PathBuf,
    default_download_path: Option<PathBuf>,
    cancel: CancellationToken,
}

impl StrmCleanup {
    pub fn new(
        validator: Arc<dyn UrlValidator>,
        subscriptions_file: PathBuf,
        default_download_path: Option<PathBuf>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            validator,
            subscriptions_file,
            default_download_path,
            cancel,
        }
    }

    pub async fn run_once(&self) -> Result<StrmCleanupSummary> {
        let subscriptions = load_subscriptions(&self.subscriptions_file).await?;
        let roots = cleanup_roots(self.default_download_path.as_deref(), &subscriptions);
        cleanup_strm_files(self.validator.as_ref(), roots, &self.cancel).await
    }
}

/// Distinct directories to scan. Empty when no subscription is enabled.
pub fn cleanup_roots(default_download_path: Option<&Path>, subscriptions: &[Subscription]) -> Vec<PathBuf> {
    let enabled: Vec<&Subscription> = subscriptions.iter().filter(|s| s.enabled).collect();
    if enabled.is_empty() {
        return Vec::new();
    }

    let mut roots: Vec<PathBuf> = Vec::new();
    let candidates = default_download_path
        .into_iter()
        .chain(enabled.iter().filter_map(|s| s.download.download_path.as_deref()));
    for path in candidates {
        if !path.as_os_str().is_empty() && !roots.iter().any(|r| r == path) {
            roots.push(path.to_path_buf());
        }
    }
    roots
}

/// Validate every `.strm` file under `roots` and delete the ones pointing at
/// URLs that are gone. Validation errors keep the file.
pub async fn cleanup_strm_files(
    validator: &dyn UrlValidator,
    roots: Vec<PathBuf>,
    cancel: &CancellationToken,
) -> Result<StrmCleanupSummary> {
    let mut summary = StrmCleanupSummary::default();

    for root in roots {
        if !tokio::fs::try_exists(&root).await.unwrap_or(false) {
            tracing::warn!(path = %root.display(), "Download directory not found");
            continue;
        }

        let scan_root = root.clone();
        let files = tokio::task::spawn_blocking(move || strm_files(&scan_root))
            .await
            .context("Strm scan task failed")?;
        tracing::info!(path = %root.display(), count = files.len(), "Checking .strm files");

        for (path, size) in files {
            if cancel.is_cancelled() {
                tracing::info!("Strm cleanup cancelled");
                return Ok(summary);
            }

            if size > MAX_STRM_FILE_SIZE {
                tracing::warn!(path = %path.display(), size, "Skipping oversized .strm file");
                summary.skipped += 1;
                continue;
            }

            match check_file(validator, &path, cancel).await {
                Ok(Some(url)) => match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        tracing::info!(path = %path.display(), url = %url, "Deleted dead .strm file");
                        summary.deleted += 1;
                    }
                    Err(e) => tracing::error!(path = %path.display(), error = %e, "Failed to delete .strm file"),
                },
                Ok(None) => {}
                Err(e) => tracing::error!(path = %path.display(), error = %e, "Failed to check .strm file"),
            }
            summary.processed += 1;
        }
    }

    tracing::info!(
        processed = summary.processed,
        deleted = summary.deleted,
        skipped = summary.skipped,
        "Strm cleanup completed"
    );
    Ok(summary)
}

/// The URL of a dead link, `None` for a live one.
async fn check_file(
    validator: &dyn UrlValidator,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<Option<String>> {
    let content = tokio::fs::read_to_string(path).await?;
    let url = content.trim();

    let valid = tokio::select! {
        valid = validator.validate(url) => valid?,
        _ = cancel.cancelled() => anyhow::bail!("cancelled"),
    };
    Ok((!valid).then(|| url.to_string()))
}

fn strm_files(root: &Path) -> Vec<(PathBuf, u64)> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("strm"))
        })
        .filter_map(|e| {
            let size = e.metadata().ok()?.len();
            Some((e.into_path(), size))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::validator::ValidationError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    /// Live unless listed as gone; `broken` URLs fail validation
    struct StubValidator {
        gone: Vec<&'static str>,
        broken: Vec<&'static str>,
    }

    #[async_trait]
    impl UrlValidator for StubValidator {
        async fn validate(&self, url: &str) -> Result<bool, ValidationError> {
            if self.broken.contains(&url) {
                return Err(ValidationError::UnexpectedStatus(500));
            }
            Ok(!self.gone.contains(&url))
        }
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_deletes_only_dead_links() {
        let dir = TempDir::new().unwrap();
        let season = dir.path().join("Tatort").join("Staffel 1");
        let live = season.join("S01E01 - Eins.strm");
        let dead = season.join("S01E02 - Zwei.strm");
        let broken = season.join("S01E03 - Drei.strm");
        let video = season.join("S01E04 - Vier.mkv");
        let oversized = dir.path().join("Gross.strm");

        write(&live, "https://cdn.example.org/e1.mp4\n");
        write(&dead, "https://cdn.example.org/e2.mp4");
        write(&broken, "https://cdn.example.org/e3.mp4");
        write(&video, "https://cdn.example.org/e2.mp4");
        // Dead URL padded past the size limit
        write(&oversized, &format!("https://cdn.example.org/e2.mp4{}", " ".repeat(5000)));

        let validator = StubValidator {
            gone: vec!["https://cdn.example.org/e2.mp4"],
            broken: vec!["https://cdn.example.org/e3.mp4"],
        };

        let summary = cleanup_strm_files(&validator, vec![dir.path().to_path_buf()], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            summary,
            StrmCleanupSummary {
                processed: 3,
                deleted: 1,
                skipped: 1
            }
        );
        assert!(live.exists());
        assert!(!dead.exists());
        assert!(broken.exists());
        assert!(video.exists());
        assert!(oversized.exists());
    }

    #[tokio::test]
    async fn test_missing_root_and_cancel() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("A.strm");
        write(&file, "https://cdn.example.org/gone.mp4");

        let validator = StubValidator {
            gone: vec!["https://cdn.example.org/gone.mp4"],
            broken: Vec::new(),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let roots = vec![dir.path().join("missing"), dir.path().to_path_buf()];
        let summary = cleanup_strm_files(&validator, roots, &cancel).await.unwrap();

        assert_eq!(summary, StrmCleanupSummary::default());
        assert!(file.exists());
    }

    #[test]
    fn test_cleanup_roots() {
        let mut a = Subscription::new("A");
        a.download.download_path = Some(PathBuf::from("/media/a"));
        let mut b = Subscription::new("B");
        b.download.download_path = Some(PathBuf::from("/media/a"));
        let mut off = Subscription::new("Off");
        off.enabled = false;
        off.download.download_path = Some(PathBuf::from("/media/off"));
        let plain = Subscription::new("Plain");

        let roots = cleanup_roots(Some(Path::new("/media")), &[a, b, off.clone(), plain]);
        assert_eq!(roots, vec![PathBuf::from("/media"), PathBuf::from("/media/a")]);

        assert!(cleanup_roots(Some(Path::new("/media")), &[off]).is_empty());
    }
}
