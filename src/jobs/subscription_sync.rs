//! Scheduled subscription run

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::config::load_subscriptions;
use crate::services::download::DownloadQueue;
use crate::services::runner::{RunSummary, SubscriptionRunner};

/// Loads the subscription file and runs every enabled subscription.
/// Overlapping triggers are skipped while a run is still in progress.
pub struct SubscriptionSync {
    runner: SubscriptionRunner,
    queue: Arc<DownloadQueue>,
    subscriptions_file: PathBuf,
    cancel: CancellationToken,
    running: tokio::sync::Mutex<()>,
}

impl SubscriptionSync {
    pub fn new(
        runner: SubscriptionRunner,
        queue: Arc<DownloadQueue>,
        subscriptions_file: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runner,
            queue,
            subscriptions_file,
            cancel,
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns `None` when a previous run has not finished yet.
    pub async fn run_once(&self) -> Result<Option<RunSummary>> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::info!("Subscription sync still running, skipping trigger");
            return Ok(None);
        };

        let subscriptions = load_subscriptions(&self.subscriptions_file).await?;
        tracing::info!(count = subscriptions.len(), "Running subscription sync");

        let summary = self.runner.run_all(&subscriptions, &self.queue, &self.cancel).await;
        Ok(Some(summary))
    }
}
