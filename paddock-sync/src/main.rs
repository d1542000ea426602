//! paddock-sync - Schedule Synchronization Service
//!
//! Mirrors the racing provider's series, seasons and schedules into the
//! local database on fixed cadences, using a bounded worker pool over a
//! shared task queue. Shutdown on Ctrl-C cancels between units.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use paddock_common::config::{resolve_data_dir, SyncSettings};
use paddock_common::events::EventBus;
use paddock_sync::model::{QueuedTask, TaskKind};
use paddock_sync::sync::{spawn_workers, RetryPolicy, SyncOrchestrator, TaskQueue};
use paddock_sync::upstream::{RateGate, UpstreamClient};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting paddock-sync (Schedule Synchronization)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Step 1: Resolve data folder and load settings
    let data_dir = resolve_data_dir(std::env::args().nth(1).as_deref());
    std::fs::create_dir_all(&data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data folder: {}", e))?;
    info!("Data folder: {}", data_dir.display());

    let settings = SyncSettings::load(&data_dir.join("paddock-sync.toml"))?;

    // Step 2: Open or create database
    let db_path = data_dir.join("paddock.db");
    info!("Database: {}", db_path.display());
    let db = paddock_common::db::init::init_database(&db_path).await?;

    // Step 3: Close out runs a previous process left non-terminal
    let interrupted = paddock_sync::db::sync_runs::mark_interrupted_runs(&db).await?;
    if interrupted > 0 {
        warn!(interrupted, "Marked runs interrupted by previous shutdown as failed");
    }

    // Step 4: Upstream client with process-wide rate gate
    let gate = Arc::new(RateGate::new(Duration::from_millis(
        settings.upstream.min_request_interval_ms,
    )));
    let client = Arc::new(UpstreamClient::from_settings(
        &settings.upstream,
        &settings.cache,
        gate,
    )?);

    // Step 5: Orchestrator, event bus and worker pool
    let events = EventBus::new(100);
    let (queue, receiver) = TaskQueue::new();
    let orchestrator = Arc::new(SyncOrchestrator::new(
        db.clone(),
        client,
        events,
        RetryPolicy::from_settings(&settings.orchestrator),
        queue.clone(),
    ));

    let cancel = CancellationToken::new();
    let workers = spawn_workers(
        orchestrator,
        receiver,
        settings.orchestrator.workers,
        cancel.clone(),
    );
    info!(workers = settings.orchestrator.workers, "Sync workers started");

    // Step 6: Scheduled triggers; each fires once at startup, then on cadence
    let trigger_tasks = spawn_triggers(&settings, queue, cancel.clone());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, cancelling sync runs");
    cancel.cancel();

    for handle in trigger_tasks.into_iter().chain(workers) {
        let _ = handle.await;
    }
    db.close().await;
    info!("Shutdown complete");

    Ok(())
}

/// One interval loop per scheduled task shape
fn spawn_triggers(
    settings: &SyncSettings,
    queue: TaskQueue,
    cancel: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut cadences = vec![
        (
            TaskKind::SeriesMetadata,
            settings.orchestrator.series_metadata_interval_secs,
        ),
        (
            TaskKind::CurrentSeasons,
            settings.orchestrator.current_seasons_interval_secs,
        ),
    ];
    if settings.orchestrator.past_seasons_enabled {
        cadences.push((
            TaskKind::PastSeasons,
            settings.orchestrator.past_seasons_interval_secs,
        ));
    }

    cadences
        .into_iter()
        .map(|(task, interval_secs)| {
            let queue = queue.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => {
                            info!(task = %task.label(), "Scheduled sync trigger");
                            queue.enqueue(QueuedTask {
                                task: task.clone(),
                                parent_run_id: None,
                                force_refresh: false,
                            });
                        }
                    }
                }
            })
        })
        .collect()
}
