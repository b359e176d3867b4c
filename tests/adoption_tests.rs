//! Integration tests for adopting existing local files
//!
//! A subscription directory with hand-made files is matched against a
//! canned catalog; confirmed mappings land in the history store.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use mediathek_dl::config::Subscription;
use mediathek_dl::services::adoption::{AdoptionCandidate, AdoptionMatchSource, AdoptionService, FileAdoptionMapping};
use mediathek_dl::services::ffmpeg::{MediaProbe, MediaProber};
use mediathek_dl::services::history::{HistoryStore, MemoryHistoryStore};
use mediathek_dl::services::quality::MemoryQualityCache;
use mediathek_dl::services::search::{ResultItem, SearchClient, SearchError, SearchPage, SearchQuery};
use mediathek_dl::services::subscription_processor::{ProcessorSettings, SubscriptionProcessor};
use mediathek_dl::services::validator::{UrlValidator, ValidationError};

// ============================================================================
// Fixtures
// ============================================================================

struct Catalog(Vec<ResultItem>);

#[async_trait]
impl SearchClient for Catalog {
    async fn search(&self, _query: &SearchQuery, offset: usize, size: usize) -> Result<SearchPage, SearchError> {
        Ok(SearchPage {
            items: self.0.iter().skip(offset).take(size).cloned().collect(),
            total_results: self.0.len() as u64,
        })
    }
}

struct AcceptAll;

#[async_trait]
impl UrlValidator for AcceptAll {
    async fn validate(&self, _url: &str) -> Result<bool, ValidationError> {
        Ok(true)
    }
}

struct NoProbe;

#[async_trait]
impl MediaProber for NoProbe {
    async fn probe(&self, _url_or_path: &str) -> Option<MediaProbe> {
        None
    }
}

fn result(id: &str, title: &str) -> ResultItem {
    ResultItem {
        id: id.to_string(),
        title: title.to_string(),
        topic: "Die Heiland".to_string(),
        url_video_hd: format!("https://cdn.example.org/{}.mp4", id),
        ..Default::default()
    }
}

fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

struct Fixture {
    _dir: TempDir,
    subscription: Subscription,
    history: Arc<MemoryHistoryStore>,
    service: AdoptionService,
    season: std::path::PathBuf,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let season = dir.path().join("Staffel 1");

    write(&season.join("S01E01 - Eins.mkv"), "video");
    write(&season.join("S01E01 - Eins.deu.ttml"), "subtitle");
    write(&season.join("S01E02 - Zwei.mkv"), "video");
    write(
        &season.join("S01E02 - Zwei.txt"),
        "Sender ARD\nURL https://cdn.example.org/e2.mp4\n",
    );

    let mut subscription = Subscription::new("Die Heiland");
    subscription.download.download_path = Some(dir.path().to_path_buf());

    let history = Arc::new(MemoryHistoryStore::new());
    let processor = SubscriptionProcessor::new(
        Arc::new(Catalog(vec![
            result("e1", "Eins (S01/E01)"),
            result("e2", "Zwei (S01/E02)"),
            result("e3", "Drei (S01/E03)"),
        ])),
        history.clone(),
        Arc::new(AcceptAll),
        Arc::new(NoProbe),
        Arc::new(MemoryQualityCache::new()),
        ProcessorSettings::default(),
    );
    let service = AdoptionService::new(Arc::new(processor), history.clone());

    Fixture {
        _dir: dir,
        subscription,
        history,
        service,
        season,
    }
}

fn candidate<'a>(candidates: &'a [AdoptionCandidate], file: &Path) -> &'a AdoptionCandidate {
    let id = file.to_string_lossy();
    candidates.iter().find(|c| c.id == id).unwrap()
}

// ============================================================================
// Candidates
// ============================================================================

mod candidates {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_candidates_group_sidecars_and_rank_matches() {
        let f = fixture();
        let info = f
            .service
            .candidates(&f.subscription, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(info.api_results.len(), 3);
        assert_eq!(info.candidates.len(), 2);

        let eins = candidate(&info.candidates, &f.season.join("S01E01 - Eins.mkv"));
        assert_eq!(eins.file_paths.len(), 2);
        assert_eq!(eins.matches[0].api_id, "e1");
        assert_eq!(eins.matches[0].source, AdoptionMatchSource::SeriesNumbering);
        assert!(!eins.matches[0].is_confirmed);

        let zwei = candidate(&info.candidates, &f.season.join("S01E02 - Zwei.mkv"));
        assert_eq!(zwei.matches[0].api_id, "e2");
        assert_eq!(zwei.matches[0].source, AdoptionMatchSource::Url);
        assert_eq!(zwei.matches[0].confidence, 100.0);
        assert_eq!(
            zwei.matches[0].video_url.as_deref(),
            Some("https://cdn.example.org/e2.mp4")
        );
    }

    #[tokio::test]
    async fn test_missing_directory_returns_only_catalog() {
        let f = fixture();
        let mut sub = f.subscription.clone();
        sub.download.download_path = None;

        let info = f.service.candidates(&sub, &CancellationToken::new()).await.unwrap();
        assert!(info.candidates.is_empty());
        assert_eq!(info.api_results.len(), 3);
    }
}

// ============================================================================
// Mapping writes
// ============================================================================

mod mappings {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_set_api_id_confirms_match() {
        let f = fixture();
        let file = f.season.join("S01E01 - Eins.mkv");
        let file_id = file.to_string_lossy().into_owned();

        f.service
            .set_api_id(&f.subscription, &file_id, "e1", None)
            .await
            .unwrap();

        let entry = f.history.get("e1", f.subscription.id).unwrap();
        assert_eq!(entry.video_url, "adopted://e1");
        assert_eq!(entry.title, "S01E01 - Eins");
        assert_eq!(entry.language, "deu");
        assert_eq!(entry.download_path, file_id);

        let info = f
            .service
            .candidates(&f.subscription, &CancellationToken::new())
            .await
            .unwrap();
        let eins = candidate(&info.candidates, &file);
        assert_eq!(eins.matches[0].source, AdoptionMatchSource::History);
        assert!(eins.matches[0].is_confirmed);
        assert_eq!(eins.matches.iter().filter(|m| m.api_id == "e1").count(), 1);
    }

    #[tokio::test]
    async fn test_set_mappings_writes_every_entry() {
        let f = fixture();
        let mappings = vec![
            FileAdoptionMapping {
                candidate_id: f.season.join("S01E01 - Eins.mkv").to_string_lossy().into_owned(),
                api_id: "e1".to_string(),
                video_url: Some("https://cdn.example.org/e1.mp4".to_string()),
            },
            FileAdoptionMapping {
                candidate_id: f.season.join("S01E02 - Zwei.mkv").to_string_lossy().into_owned(),
                api_id: "e2".to_string(),
                video_url: None,
            },
        ];

        f.service.set_mappings(&f.subscription, &mappings).await.unwrap();

        let all = f.history.by_subscription(f.subscription.id).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(
            f.history.get("e1", f.subscription.id).unwrap().video_url,
            "https://cdn.example.org/e1.mp4"
        );
    }
}
