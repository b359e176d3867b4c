//! Stale temp file cleanup

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Delete files under `temp_dir` whose last modification is older than `max_age`.
/// Returns the number of files removed. A missing directory is not an error.
pub async fn cleanup_temp_files(temp_dir: PathBuf, max_age: Duration) -> Result<usize> {
    if !tokio::fs::try_exists(&temp_dir).await.unwrap_or(false) {
        return Ok(0);
    }

    let stale = tokio::task::spawn_blocking(move || stale_files(&temp_dir, max_age))
        .await
        .context("Temp scan task failed")?;

    let mut removed = 0;
    for path in stale {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Removed stale temp file");
                removed += 1;
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
        }
    }

    tracing::info!(removed, "Temp file cleanup completed");
    Ok(removed)
}

fn stale_files(temp_dir: &Path, max_age: Duration) -> Vec<PathBuf> {
    let now = SystemTime::now();

    WalkDir::new(temp_dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > max_age)
        })
        .map(|e| e.into_path())
        .collect()
}
