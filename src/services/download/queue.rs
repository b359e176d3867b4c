//! Bounded download queue
//!
//! Jobs run with limited concurrency behind a semaphore. Every job gets a
//! child of the queue-wide cancellation token so a single job or the whole
//! queue can be stopped. History is written only for jobs that completed
//! every item without being cancelled.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{DownloadJob, TransferError, TransferExecutor};
use crate::services::history::{HistoryStore, NewHistoryEntry};
use crate::services::nfo::write_nfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Finished,
    Failed,
    Cancelled,
}

/// Snapshot of one queued job
#[derive(Debug, Clone, Serialize)]
pub struct ActiveDownload {
    pub id: Uuid,
    pub title: String,
    pub item_id: String,
    pub status: DownloadStatus,
    pub error: Option<String>,
    pub queued_at: DateTime<Utc>,
    #[serde(skip)]
    token: CancellationToken,
}

/// Outcome counts after [`DownloadQueue::wait`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub finished: usize,
    pub failed: usize,
    pub cancelled: usize,
}

pub struct DownloadQueue {
    executor: Arc<dyn TransferExecutor>,
    history: Arc<dyn HistoryStore>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    downloads: Arc<RwLock<HashMap<Uuid, ActiveDownload>>>,
    handles: Mutex<Vec<(Uuid, JoinHandle<()>)>>,
}

impl DownloadQueue {
    pub fn new(
        executor: Arc<dyn TransferExecutor>,
        history: Arc<dyn HistoryStore>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            executor,
            history,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            cancel: CancellationToken::new(),
            downloads: Arc::new(RwLock::new(HashMap::new())),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Queue a job and start it as soon as a slot is free.
    pub fn enqueue(&self, job: DownloadJob) -> Uuid {
        let id = Uuid::new_v4();
        let token = self.cancel.child_token();

        self.downloads.write().insert(
            id,
            ActiveDownload {
                id,
                title: job.title.clone(),
                item_id: job.item_id.clone(),
                status: DownloadStatus::Queued,
                error: None,
                queued_at: Utc::now(),
                token: token.clone(),
            },
        );
        info!(job_id = %id, title = %job.title, "Queued download job");

        let semaphore = self.semaphore.clone();
        let executor = self.executor.clone();
        let history = self.history.clone();
        let downloads = self.downloads.clone();

        let handle = tokio::spawn(async move {
            let permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit,
                _ = token.cancelled() => {
                    set_status(&downloads, id, DownloadStatus::Cancelled, None);
                    return;
                }
            };
            let Ok(_permit) = permit else {
                set_status(&downloads, id, DownloadStatus::Failed, Some("queue closed".to_string()));
                return;
            };

            set_status(&downloads, id, DownloadStatus::Downloading, None);
            debug!(job_id = %id, "Starting download job");

            match run_job(executor.as_ref(), history.as_ref(), &job, &token).await {
                Ok(()) => {
                    info!(job_id = %id, title = %job.title, "Download job finished");
                    set_status(&downloads, id, DownloadStatus::Finished, None);
                }
                Err(TransferError::Cancelled) => {
                    info!(job_id = %id, title = %job.title, "Download job cancelled");
                    set_status(&downloads, id, DownloadStatus::Cancelled, None);
                }
                Err(e) => {
                    error!(job_id = %id, title = %job.title, error = %e, "Download job failed");
                    set_status(&downloads, id, DownloadStatus::Failed, Some(e.to_string()));
                }
            }
        });

        self.handles.lock().push((id, handle));
        id
    }

    /// Cancel one job. Returns false if it is unknown or already done.
    pub fn cancel(&self, id: Uuid) -> bool {
        let downloads = self.downloads.read();
        match downloads.get(&id) {
            Some(download) if matches!(download.status, DownloadStatus::Queued | DownloadStatus::Downloading) => {
                download.token.cancel();
                info!(job_id = %id, title = %download.title, "Cancelled download job");
                true
            }
            _ => false,
        }
    }

    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    pub fn status(&self, id: Uuid) -> Option<DownloadStatus> {
        self.downloads.read().get(&id).map(|d| d.status)
    }

    pub fn snapshot(&self) -> Vec<ActiveDownload> {
        let mut downloads: Vec<ActiveDownload> = self.downloads.read().values().cloned().collect();
        downloads.sort_by_key(|d| d.queued_at);
        downloads
    }

    /// Wait for every job queued so far.
    ///
    /// The summary covers the jobs settled by this call, which are then
    /// dropped from the status map so a long-lived queue starts each run empty.
    pub async fn wait(&self) -> QueueSummary {
        let mut summary = QueueSummary::default();

        loop {
            let batch: Vec<(Uuid, JoinHandle<()>)> = std::mem::take(&mut *self.handles.lock());
            if batch.is_empty() {
                break;
            }

            let (ids, handles): (Vec<Uuid>, Vec<JoinHandle<()>>) = batch.into_iter().unzip();
            for result in futures::future::join_all(handles).await {
                if let Err(e) = result {
                    error!(error = %e, "Download task panicked");
                }
            }

            let mut downloads = self.downloads.write();
            for id in ids {
                match downloads.remove(&id).map(|d| d.status) {
                    Some(DownloadStatus::Finished) => summary.finished += 1,
                    Some(DownloadStatus::Cancelled) => summary.cancelled += 1,
                    // A task that ended without settling panicked
                    Some(DownloadStatus::Failed | DownloadStatus::Queued | DownloadStatus::Downloading) => {
                        summary.failed += 1
                    }
                    None => {}
                }
            }
        }

        summary
    }
}

fn set_status(
    downloads: &RwLock<HashMap<Uuid, ActiveDownload>>,
    id: Uuid,
    status: DownloadStatus,
    error: Option<String>,
) {
    if let Some(download) = downloads.write().get_mut(&id) {
        download.status = status;
        download.error = error;
    }
}

/// Execute all items of a job in order, then record history and the NFO.
pub async fn run_job(
    executor: &dyn TransferExecutor,
    history: &dyn HistoryStore,
    job: &DownloadJob,
    token: &CancellationToken,
) -> Result<(), TransferError> {
    for item in &job.items {
        if token.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        executor.execute(item, token).await?;
    }

    if token.is_cancelled() {
        return Err(TransferError::Cancelled);
    }

    if let Some(main) = job.main_item() {
        let entry = NewHistoryEntry {
            video_url: main.source_url.clone(),
            item_id: job.item_id.clone(),
            subscription_id: job.subscription_id,
            download_path: main.destination_path.to_string_lossy().into_owned(),
            title: job.title.clone(),
            language: job.parsed.language.clone(),
        };
        if let Err(e) = history.add(entry).await {
            error!(item_id = %job.item_id, error = %e, "Failed to record download history");
        }
    }

    if let Some(nfo) = &job.nfo {
        if let Err(e) = write_nfo(nfo).await {
            warn!(path = %nfo.file_path.display(), error = %e, "Failed to write NFO file");
        }
    }

    Ok(())
}
