//! Background job scheduling

pub mod strm_cleanup;
pub mod subscription_sync;
pub mod temp_cleanup;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

pub use strm_cleanup::StrmCleanup;
pub use subscription_sync::SubscriptionSync;

/// Daily at 04:00
const STRM_CLEANUP_SCHEDULE: &str = "0 0 4 * * *";

/// Initialize and start the job scheduler.
/// `strm_cleanup` is registered only when given.
pub async fn start_scheduler(
    sync: Arc<SubscriptionSync>,
    schedule: &str,
    temp_dir: PathBuf,
    temp_max_age: Duration,
    strm_cleanup: Option<Arc<StrmCleanup>>,
) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // Subscription sync - configured schedule
    let sync_job = Job::new_async(schedule, move |_uuid, _l| {
        let sync = sync.clone();
        Box::pin(async move {
            match sync.run_once().await {
                Ok(Some(summary)) => info!(
                    jobs = summary.jobs,
                    finished = summary.downloads.finished,
                    failed = summary.downloads.failed,
                    "Scheduled subscription sync finished"
                ),
                Ok(None) => {}
                Err(e) => tracing::error!("Subscription sync error: {:#}", e),
            }
        })
    })?;
    scheduler.add(sync_job).await?;

    // Temp file cleanup - run every hour
    let cleanup_job = Job::new_async("0 0 * * * *", move |_uuid, _l| {
        let dir = temp_dir.clone();
        Box::pin(async move {
            info!("Running temp file cleanup");
            if let Err(e) = temp_cleanup::cleanup_temp_files(dir, temp_max_age).await {
                tracing::error!("Temp cleanup error: {:#}", e);
            }
        })
    })?;
    scheduler.add(cleanup_job).await?;

    if let Some(strm_cleanup) = strm_cleanup {
        let strm_job = Job::new_async(STRM_CLEANUP_SCHEDULE, move |_uuid, _l| {
            let strm_cleanup = strm_cleanup.clone();
            Box::pin(async move {
                info!("Running .strm cleanup");
                if let Err(e) = strm_cleanup.run_once().await {
                    tracing::error!("Strm cleanup error: {:#}", e);
                }
            })
        })?;
        scheduler.add(strm_job).await?;
    }

    scheduler.start().await?;

    info!(schedule = %schedule, "Job scheduler started");
    Ok(scheduler)
}
