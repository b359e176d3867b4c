//! mediathek-dl - subscription downloader for the MediathekView archive

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use mediathek_dl::app::AppState;
use mediathek_dl::cli::{CliOptions, Command, USAGE};
use mediathek_dl::config::Config;
use mediathek_dl::jobs::{self, SubscriptionSync};
use mediathek_dl::services::logging::{LogFormat, init_tracing};
use mediathek_dl::services::runner::SubscriptionJobs;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let options = match CliOptions::from_args() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    if options.command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::from_env()?;
    init_tracing(LogFormat::from_setting(config.log_format.as_deref()));
    config.validate()?;

    if options.config_check {
        println!("Configuration OK");
        return Ok(());
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting mediathek-dl");
    let state = AppState::build(config).await?;

    match options.command {
        Command::Run => run(&state).await,
        Command::DryRun => dry_run(&state).await,
        Command::Adopt { subscription } => {
            let subscription = state.find_subscription(&subscription).await?;
            let info = state
                .adoption()
                .candidates(&subscription, &CancellationToken::new())
                .await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        Command::AdoptSet {
            subscription,
            file,
            api_id,
            video_url,
        } => {
            let subscription = state.find_subscription(&subscription).await?;
            state
                .adoption()
                .set_api_id(&subscription, &file.to_string_lossy(), &api_id, video_url.as_deref())
                .await
        }
        Command::Daemon => daemon(&state).await,
        Command::StrmCleanup => {
            let summary = state.strm_cleanup(CancellationToken::new()).run_once().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Help => Ok(()),
    }
}

async fn run(state: &AppState) -> Result<()> {
    let subscriptions = state.subscriptions().await?;
    let queue = Arc::new(state.download_queue()?);
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone(), queue.clone());

    let summary = state.runner().run_all(&subscriptions, &queue, &cancel).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn dry_run(state: &AppState) -> Result<()> {
    let subscriptions = state.subscriptions().await?;
    let resolved: Vec<SubscriptionJobs> = state
        .runner()
        .collect_jobs(&subscriptions, &CancellationToken::new())
        .await;
    println!("{}", serde_json::to_string_pretty(&resolved)?);
    Ok(())
}

async fn daemon(state: &AppState) -> Result<()> {
    let schedule = state
        .config
        .search_schedule
        .clone()
        .context("SEARCH_SCHEDULE must be set for daemon mode")?;

    let queue = Arc::new(state.download_queue()?);
    let cancel = CancellationToken::new();
    let sync = Arc::new(SubscriptionSync::new(
        state.runner(),
        queue.clone(),
        state.config.subscriptions_file.clone(),
        cancel.clone(),
    ));
    let strm_cleanup = state
        .config
        .enable_strm_cleanup
        .then(|| Arc::new(state.strm_cleanup(cancel.clone())));

    let mut scheduler = jobs::start_scheduler(
        sync,
        &schedule,
        state.config.temp_path.clone(),
        Duration::from_secs(state.config.temp_file_max_age_hours * 3600),
        strm_cleanup,
    )
    .await?;

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");

    cancel.cancel();
    queue.cancel_all();
    scheduler.shutdown().await?;
    queue.wait().await;
    state.db.pool().close().await;
    Ok(())
}

fn cancel_on_ctrl_c(cancel: CancellationToken, queue: Arc<mediathek_dl::services::download::DownloadQueue>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Cancelling downloads");
            cancel.cancel();
            queue.cancel_all();
        }
    });
}
