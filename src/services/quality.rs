//! Quality probing and the upgrade decision
//!
//! Remote probe results are cached by URL hash. A cache entry is only trusted
//! when [`QualityCacheEntry::is_valid`] holds; anything else is dropped and the
//! URL is probed again.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::ffmpeg::{MediaProbe, MediaProber};
use super::text_utils::url_hash;

/// Maximum duration difference between the local copy and an upgrade candidate
pub const DURATION_TOLERANCE_SECS: f64 = 2.0;

/// Cached probe result for a remote URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCacheEntry {
    pub url_hash: String,
    pub width: u32,
    pub height: u32,
    /// Seconds
    pub duration: f64,
    pub size: u64,
    pub updated_at: DateTime<Utc>,
}

impl QualityCacheEntry {
    pub fn from_probe(url_hash: impl Into<String>, probe: &MediaProbe) -> Self {
        Self {
            url_hash: url_hash.into(),
            width: probe.width.unwrap_or(0),
            height: probe.height.unwrap_or(0),
            duration: probe.duration.unwrap_or(0.0),
            size: probe.size.unwrap_or(0),
            updated_at: Utc::now(),
        }
    }

    /// Zero duration or zero dimensions mark a failed earlier probe.
    pub fn is_valid(&self) -> bool {
        self.duration > 0.0 && self.width > 0 && self.height > 0
    }

    pub fn to_probe(&self) -> MediaProbe {
        MediaProbe {
            width: Some(self.width),
            height: Some(self.height),
            duration: Some(self.duration),
            size: Some(self.size).filter(|s| *s > 0),
        }
    }
}

/// Probe cache seam
#[async_trait]
pub trait QualityCache: Send + Sync {
    async fn get(&self, url_hash: &str) -> Result<Option<QualityCacheEntry>>;
    async fn put(&self, entry: QualityCacheEntry) -> Result<()>;
    async fn invalidate(&self, url_hash: &str) -> Result<()>;
}

/// In-memory cache for tests
#[derive(Default)]
pub struct MemoryQualityCache {
    entries: RwLock<HashMap<String, QualityCacheEntry>>,
}

impl MemoryQualityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl QualityCache for MemoryQualityCache {
    async fn get(&self, url_hash: &str) -> Result<Option<QualityCacheEntry>> {
        Ok(self.entries.read().get(url_hash).cloned())
    }

    async fn put(&self, entry: QualityCacheEntry) -> Result<()> {
        self.entries.write().insert(entry.url_hash.clone(), entry);
        Ok(())
    }

    async fn invalidate(&self, url_hash: &str) -> Result<()> {
        self.entries.write().remove(url_hash);
        Ok(())
    }
}

/// Compares a local copy against an online candidate
pub struct QualityChecker {
    prober: Arc<dyn MediaProber>,
    cache: Arc<dyn QualityCache>,
}

impl QualityChecker {
    pub fn new(prober: Arc<dyn MediaProber>, cache: Arc<dyn QualityCache>) -> Self {
        Self { prober, cache }
    }

    /// Probe a remote URL, going through the cache.
    pub async fn online_quality(&self, url: &str) -> Option<MediaProbe> {
        let hash = url_hash(url);

        match self.cache.get(&hash).await {
            Ok(Some(entry)) if entry.is_valid() => {
                debug!(url = %url, "Using cached quality info");
                return Some(entry.to_probe());
            }
            Ok(Some(_)) => {
                debug!(url = %url, "Discarding invalid quality cache entry");
                if let Err(e) = self.cache.invalidate(&hash).await {
                    warn!(error = %e, "Failed to invalidate quality cache entry");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to read quality cache"),
        }

        let probe = self.prober.probe(url).await?;
        if probe.is_complete() {
            if let Err(e) = self.cache.put(QualityCacheEntry::from_probe(hash, &probe)).await {
                warn!(error = %e, "Failed to store quality cache entry");
            }
        }
        Some(probe)
    }

    /// True only when the online candidate is strictly larger in both
    /// dimensions and has the same duration within tolerance.
    pub async fn is_upgrade_available(&self, current_path: &str, new_url: &str) -> bool {
        let current = self.prober.probe(current_path).await;
        let online = self.online_quality(new_url).await;

        match (current, online) {
            (Some(current), Some(online)) => is_upgrade(&current, &online),
            _ => {
                warn!(path = %current_path, url = %new_url, "Could not determine media info for quality comparison");
                false
            }
        }
    }
}

/// Pure upgrade rule
pub fn is_upgrade(current: &MediaProbe, online: &MediaProbe) -> bool {
    if !current.is_complete() || !online.is_complete() {
        return false;
    }

    let (Some(cw), Some(ch), Some(cd)) = (current.width, current.height, current.duration) else {
        return false;
    };
    let (Some(ow), Some(oh), Some(od)) = (online.width, online.height, online.duration) else {
        return false;
    };

    if oh <= ch || ow <= cw {
        info!(current = %format!("{cw}x{ch}"), online = %format!("{ow}x{oh}"), "No quality upgrade available");
        return false;
    }

    if (od - cd).abs() > DURATION_TOLERANCE_SECS {
        info!(current_duration = cd, online_duration = od, "No quality upgrade due to duration mismatch");
        return false;
    }

    info!(current = %format!("{cw}x{ch}"), online = %format!("{ow}x{oh}"), "Quality upgrade available");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn probe(w: u32, h: u32, d: f64) -> MediaProbe {
        MediaProbe {
            width: Some(w),
            height: Some(h),
            duration: Some(d),
            size: None,
        }
    }

    struct CountingProber {
        result: Option<MediaProbe>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MediaProber for CountingProber {
        async fn probe(&self, _url_or_path: &str) -> Option<MediaProbe> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
        }
    }

    #[test]
    fn test_upgrade_requires_both_dimensions() {
        assert!(is_upgrade(&probe(1280, 720, 1800.0), &probe(1920, 1080, 1801.0)));
        assert!(!is_upgrade(&probe(1280, 720, 1800.0), &probe(1280, 1080, 1800.0)));
        assert!(!is_upgrade(&probe(1280, 720, 1800.0), &probe(1920, 720, 1800.0)));
        assert!(!is_upgrade(&probe(1920, 1080, 1800.0), &probe(1280, 720, 1800.0)));
    }

    #[test]
    fn test_upgrade_duration_tolerance() {
        assert!(is_upgrade(&probe(640, 360, 100.0), &probe(1280, 720, 102.0)));
        assert!(!is_upgrade(&probe(640, 360, 100.0), &probe(1280, 720, 102.5)));
        assert!(!is_upgrade(&probe(640, 360, 100.0), &probe(1280, 720, 0.0)));

        let missing = MediaProbe {
            width: Some(1280),
            height: Some(720),
            duration: None,
            size: None,
        };
        assert!(!is_upgrade(&probe(640, 360, 100.0), &missing));
    }

    #[test]
    fn test_cache_entry_validity() {
        let entry = QualityCacheEntry::from_probe("h", &probe(1280, 720, 60.0));
        assert!(entry.is_valid());
        assert!(!QualityCacheEntry::from_probe("h", &probe(1280, 720, 0.0)).is_valid());
        assert!(!QualityCacheEntry::from_probe("h", &probe(0, 720, 60.0)).is_valid());
    }

    #[tokio::test]
    async fn test_online_quality_uses_cache() {
        let prober = Arc::new(CountingProber {
            result: Some(probe(1920, 1080, 60.0)),
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(MemoryQualityCache::new());
        let checker = QualityChecker::new(prober.clone(), cache.clone());

        assert!(checker.online_quality("https://cdn/a.mp4").await.is_some());
        assert!(checker.online_quality("https://cdn/a.mp4").await.is_some());
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_cache_entry_is_reprobed() {
        let prober = Arc::new(CountingProber {
            result: Some(probe(1920, 1080, 60.0)),
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(MemoryQualityCache::new());
        let url = "https://cdn/b.mp4";
        cache
            .put(QualityCacheEntry::from_probe(url_hash(url), &probe(1920, 1080, 0.0)))
            .await
            .unwrap();

        let checker = QualityChecker::new(prober.clone(), cache.clone());
        let result = checker.online_quality(url).await.unwrap();

        assert_eq!(result.duration, Some(60.0));
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
        assert!(cache.get(&url_hash(url)).await.unwrap().unwrap().is_valid());
    }

    #[tokio::test]
    async fn test_incomplete_probe_is_not_cached() {
        let prober = Arc::new(CountingProber {
            result: Some(probe(1920, 1080, 0.0)),
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(MemoryQualityCache::new());
        let checker = QualityChecker::new(prober.clone(), cache.clone());

        assert!(checker.online_quality("https://cdn/c.mp4").await.is_some());
        assert!(checker.online_quality("https://cdn/c.mp4").await.is_some());
        assert!(cache.is_empty());
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_upgrade_without_probe_data() {
        let prober = Arc::new(CountingProber {
            result: None,
            calls: AtomicUsize::new(0),
        });
        let checker = QualityChecker::new(prober, Arc::new(MemoryQualityCache::new()));
        assert!(!checker.is_upgrade_available("/media/a.mkv", "https://cdn/a.mp4").await);
    }
}
