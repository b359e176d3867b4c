//! Subscription run orchestration

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use super::download::{DownloadJob, DownloadQueue, QueueSummary};
use super::subscription_processor::SubscriptionProcessor;
use crate::config::Subscription;

/// Subscriptions resolved at the same time
const MAX_PARALLEL_SUBSCRIPTIONS: usize = 4;

/// Jobs produced for one subscription
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionJobs {
    pub subscription_id: Uuid,
    pub subscription: String,
    pub jobs: Vec<DownloadJob>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RunSummary {
    pub subscriptions: usize,
    pub jobs: usize,
    pub downloads: QueueSummary,
}

pub struct SubscriptionRunner {
    processor: Arc<SubscriptionProcessor>,
}

impl SubscriptionRunner {
    pub fn new(processor: Arc<SubscriptionProcessor>) -> Self {
        Self { processor }
    }

    /// Resolve every enabled subscription concurrently without downloading.
    pub async fn collect_jobs(&self, subscriptions: &[Subscription], cancel: &CancellationToken) -> Vec<SubscriptionJobs> {
        let enabled: Vec<Subscription> = subscriptions.iter().filter(|s| s.enabled).cloned().collect();

        futures::stream::iter(enabled)
            .map(|subscription| {
                let processor = self.processor.clone();
                let cancel = cancel.clone();
                async move {
                    let name = subscription.name.clone();
                    let id = subscription.id;
                    let handle = tokio::spawn(async move { processor.process(&subscription, &cancel).await });
                    match handle.await {
                        Ok(jobs) => Some(SubscriptionJobs {
                            subscription_id: id,
                            subscription: name,
                            jobs,
                        }),
                        Err(e) => {
                            error!(subscription = %name, error = %e, "Subscription run failed");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(MAX_PARALLEL_SUBSCRIPTIONS)
            .filter_map(|result| async move { result })
            .collect()
            .await
    }

    /// Resolve all enabled subscriptions, queue their jobs and wait for the downloads.
    pub async fn run_all(
        &self,
        subscriptions: &[Subscription],
        queue: &DownloadQueue,
        cancel: &CancellationToken,
    ) -> RunSummary {
        let resolved = self.collect_jobs(subscriptions, cancel).await;

        let mut summary = RunSummary {
            subscriptions: resolved.len(),
            ..Default::default()
        };

        for result in resolved {
            info!(subscription = %result.subscription, jobs = result.jobs.len(), "Queueing jobs");
            summary.jobs += result.jobs.len();
            for job in result.jobs {
                queue.enqueue(job);
            }
        }

        summary.downloads = queue.wait().await;
        info!(
            subscriptions = summary.subscriptions,
            jobs = summary.jobs,
            finished = summary.downloads.finished,
            failed = summary.downloads.failed,
            cancelled = summary.downloads.cancelled,
            "Subscription run complete"
        );
        summary
    }
}
