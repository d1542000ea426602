//! Sync orchestrator
//!
//! Owns the task queue, the worker pool and the run lifecycle. Workers pull
//! `QueuedTask`s off a shared queue; each task executes as one `SyncRun`
//! persisted to the audit log, with lifecycle events broadcast on the bus.
//!
//! Retry happens at two levels: the upstream client retries individual
//! requests, and the orchestrator retries a task's whole fetch phase when
//! the client gives up on a transient error. Reconcile errors are never
//! retried; they surface as failed units.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use paddock_common::config::OrchestratorSettings;
use paddock_common::events::{EventBus, PaddockEvent};

use crate::db;
use crate::model::{QueuedTask, RunState, SyncRun, TaskKind, UnitOutcome};
use crate::reconcile::{ReconcileSummary, Reconciler};
use crate::upstream::{UpstreamClient, UpstreamError};

/// Task-level backoff shape
#[derive(Debug, Clone)]
pub enum Backoff {
    /// Constant step between attempts
    Linear { step: Duration },
    /// `initial * 2^attempt`, capped
    Exponential { initial: Duration, max: Duration },
}

/// Task-level retry policy for transient fetch failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first; 1 = no retry
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                initial: Duration::from_secs(2),
                max: Duration::from_secs(60),
            },
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match &self.backoff {
            Backoff::Linear { step } => step.saturating_mul(attempt + 1),
            Backoff::Exponential { initial, max } => initial
                .saturating_mul(2u32.saturating_pow(attempt))
                .min(*max),
        }
    }

    /// Unknown backoff names fall back to exponential
    pub fn from_settings(settings: &OrchestratorSettings) -> Self {
        let step = Duration::from_millis(settings.retry_delay_ms);
        let backoff = match settings.retry_backoff.as_str() {
            "linear" => Backoff::Linear { step },
            _ => Backoff::Exponential {
                initial: step,
                max: Duration::from_secs(60),
            },
        };
        Self {
            max_attempts: settings.retry_max_attempts,
            backoff,
        }
    }
}

/// Cloneable producer handle for the task queue
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
}

impl TaskQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<QueuedTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a task; returns false if the worker pool has shut down
    pub fn enqueue(&self, task: QueuedTask) -> bool {
        let accepted = self.tx.send(task).is_ok();
        if !accepted {
            tracing::warn!("Task queue closed, task dropped");
        }
        accepted
    }
}

/// The sync orchestrator: run lifecycle, fan-out and audit persistence
pub struct SyncOrchestrator {
    db: SqlitePool,
    client: Arc<UpstreamClient>,
    reconciler: Reconciler,
    events: EventBus,
    retry: RetryPolicy,
    queue: TaskQueue,
}

impl SyncOrchestrator {
    pub fn new(
        db: SqlitePool,
        client: Arc<UpstreamClient>,
        events: EventBus,
        retry: RetryPolicy,
        queue: TaskQueue,
    ) -> Self {
        let reconciler = Reconciler::new(db.clone());
        Self {
            db,
            client,
            reconciler,
            events,
            retry,
            queue,
        }
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Execute one queued task as a persisted sync run
    ///
    /// Returns the finished run. Errors here are audit-log persistence
    /// failures only; upstream and reconcile failures end up recorded in
    /// the run itself.
    pub async fn run_task(
        &self,
        queued: QueuedTask,
        cancel: &CancellationToken,
    ) -> paddock_common::Result<SyncRun> {
        let mut run = SyncRun::new(queued.task.clone(), queued.parent_run_id);
        db::sync_runs::insert_run(&self.db, &run).await?;
        self.events.emit_lossy(PaddockEvent::SyncRunStarted {
            run_id: run.run_id,
            task: run.task.label(),
            timestamp: run.started_at,
        });

        tracing::info!(
            run_id = %run.run_id,
            task = %run.task.label(),
            force_refresh = queued.force_refresh,
            "Sync run started"
        );

        if cancel.is_cancelled() {
            return self.finish_cancelled(run).await;
        }

        match queued.task.clone() {
            TaskKind::SeriesMetadata => {
                self.run_series_metadata(&mut run, queued.force_refresh).await?
            }
            TaskKind::CurrentSeasons => {
                self.run_current_seasons(&mut run, queued.force_refresh, cancel)
                    .await?
            }
            TaskKind::PastSeasons => {
                self.run_past_seasons(&mut run, queued.force_refresh, cancel)
                    .await?
            }
            TaskKind::SeasonSchedule { season_external_id } => {
                self.run_season_schedule(&mut run, season_external_id, queued.force_refresh)
                    .await?
            }
            TaskKind::SeriesRefresh { series_external_id } => {
                self.run_series_refresh(&mut run, series_external_id, queued.force_refresh)
                    .await?
            }
        }

        if run.state == RunState::Cancelled {
            return Ok(run);
        }

        if !run.state.is_terminal() {
            run.finish();
        }
        db::sync_runs::update_run(&self.db, &run).await?;
        self.emit_finished(&run);

        tracing::info!(
            run_id = %run.run_id,
            state = run.state.as_str(),
            created = run.counts.created,
            updated = run.counts.updated,
            skipped = run.counts.skipped,
            "Sync run finished"
        );

        Ok(run)
    }

    async fn run_series_metadata(
        &self,
        run: &mut SyncRun,
        force_refresh: bool,
    ) -> paddock_common::Result<()> {
        self.set_state(run, RunState::Fetching).await?;
        let payloads = match self
            .fetch_with_retry("series-list", || self.client.list_series(force_refresh))
            .await
        {
            Ok(p) => p,
            Err(e) => return self.fail_run(run, e).await,
        };

        self.set_state(run, RunState::Reconciling).await?;
        let summary = self.reconciler.reconcile_series_list(&payloads).await;
        self.record_summary(run, "series-list", summary).await?;
        Ok(())
    }

    async fn run_current_seasons(
        &self,
        run: &mut SyncRun,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> paddock_common::Result<()> {
        self.set_state(run, RunState::Fetching).await?;
        let payloads = match self
            .fetch_with_retry("current-seasons", || self.client.current_seasons(force_refresh))
            .await
        {
            Ok(p) => p,
            Err(e) => return self.fail_run(run, e).await,
        };

        self.set_state(run, RunState::Reconciling).await?;
        for payload in &payloads {
            if cancel.is_cancelled() {
                self.finish_cancelled_in_place(run).await?;
                return Ok(());
            }
            self.reconcile_one_season(run, payload).await?;
        }
        Ok(())
    }

    async fn run_past_seasons(
        &self,
        run: &mut SyncRun,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> paddock_common::Result<()> {
        self.set_state(run, RunState::Fetching).await?;
        let series_ids = db::series::list_series_external_ids(&self.db).await?;

        for series_id in series_ids {
            if cancel.is_cancelled() {
                self.finish_cancelled_in_place(run).await?;
                return Ok(());
            }

            let unit = format!("series:{series_id}");
            match self
                .fetch_with_retry(&unit, || self.client.past_seasons(series_id, force_refresh))
                .await
            {
                Ok(refs) => {
                    for past in &refs {
                        self.queue.enqueue(QueuedTask {
                            task: TaskKind::SeasonSchedule {
                                season_external_id: past.external_id,
                            },
                            parent_run_id: Some(run.run_id),
                            force_refresh,
                        });
                    }
                    tracing::debug!(
                        run_id = %run.run_id,
                        series_external_id = series_id,
                        children = refs.len(),
                        "Queued past-season schedule tasks"
                    );
                    self.record_unit(run, UnitOutcome::ok(unit, Default::default()))
                        .await?;
                }
                Err(e) => {
                    run.counts.skipped += 1;
                    self.record_unit(run, UnitOutcome::failed(unit, e.to_string()))
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn run_season_schedule(
        &self,
        run: &mut SyncRun,
        season_external_id: i64,
        force_refresh: bool,
    ) -> paddock_common::Result<()> {
        self.set_state(run, RunState::Fetching).await?;
        let unit = format!("season-schedule:{season_external_id}");
        let payload = match self
            .fetch_with_retry(&unit, || {
                self.client.season_schedule(season_external_id, force_refresh)
            })
            .await
        {
            Ok(p) => p,
            Err(e) => return self.fail_run(run, e).await,
        };

        self.set_state(run, RunState::Reconciling).await?;
        self.reconcile_one_season(run, &payload).await?;
        Ok(())
    }

    async fn run_series_refresh(
        &self,
        run: &mut SyncRun,
        series_external_id: i64,
        force_refresh: bool,
    ) -> paddock_common::Result<()> {
        self.set_state(run, RunState::Fetching).await?;
        let payloads = match self
            .fetch_with_retry("series-list", || self.client.list_series(force_refresh))
            .await
        {
            Ok(p) => p,
            Err(e) => return self.fail_run(run, e).await,
        };

        let Some(payload) = payloads.iter().find(|p| p.external_id == series_external_id)
        else {
            run.fail(format!(
                "series {series_external_id} not present in upstream listing"
            ));
            return Ok(());
        };

        self.set_state(run, RunState::Reconciling).await?;
        let unit = format!("series:{series_external_id}");
        match self.reconciler.reconcile_series(payload).await {
            Ok(counts) => {
                self.record_unit(run, UnitOutcome::ok(unit, counts)).await?;
            }
            Err(e) => {
                run.counts.skipped += 1;
                self.record_unit(run, UnitOutcome::failed(unit, e.to_string()))
                    .await?;
            }
        }
        Ok(())
    }

    /// One season payload as one or more recorded units
    async fn reconcile_one_season(
        &self,
        run: &mut SyncRun,
        payload: &crate::upstream::SeasonSchedulePayload,
    ) -> paddock_common::Result<()> {
        let unit = format!("season:{}", payload.external_id);
        match self.reconciler.reconcile_season(payload).await {
            Ok(summary) => {
                let round_errors: Vec<UnitOutcome> = summary
                    .errors
                    .iter()
                    .map(|e| UnitOutcome::failed(format!("{unit}/{}", e.unit), e.error.to_string()))
                    .collect();

                self.record_unit(run, UnitOutcome::ok(unit, summary.counts))
                    .await?;
                for outcome in round_errors {
                    self.record_unit(run, outcome).await?;
                }
            }
            Err(e) => {
                run.counts.skipped += 1;
                self.record_unit(run, UnitOutcome::failed(unit, e.to_string()))
                    .await?;
            }
        }
        Ok(())
    }

    /// Record an already-computed summary as one ok unit plus failed units
    async fn record_summary(
        &self,
        run: &mut SyncRun,
        unit: &str,
        summary: ReconcileSummary,
    ) -> paddock_common::Result<()> {
        let failed: Vec<UnitOutcome> = summary
            .errors
            .iter()
            .map(|e| UnitOutcome::failed(e.unit.clone(), e.error.to_string()))
            .collect();

        self.record_unit(run, UnitOutcome::ok(unit.to_string(), summary.counts))
            .await?;
        for outcome in failed {
            self.record_unit(run, outcome).await?;
        }
        Ok(())
    }

    /// Task-level retry wrapper around a fetch phase
    async fn fetch_with_retry<T, F, Fut>(&self, label: &str, f: F) -> Result<T, UpstreamError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, UpstreamError>>,
    {
        let mut last_err = None;
        for attempt in 0..self.retry.max_attempts {
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() => {
                    if attempt + 1 < self.retry.max_attempts {
                        let delay = self.retry.delay_for_attempt(attempt);
                        tracing::warn!(
                            unit = label,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Fetch phase failed, retrying task"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| UpstreamError::Network("retry loop exhausted".to_string())))
    }

    async fn set_state(&self, run: &mut SyncRun, state: RunState) -> paddock_common::Result<()> {
        run.transition_to(state);
        db::sync_runs::update_run(&self.db, run).await?;
        self.events.emit_lossy(PaddockEvent::SyncRunStateChanged {
            run_id: run.run_id,
            state: state.as_str().to_string(),
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    async fn record_unit(
        &self,
        run: &mut SyncRun,
        outcome: UnitOutcome,
    ) -> paddock_common::Result<()> {
        db::sync_runs::insert_unit(&self.db, run.run_id, &outcome).await?;
        self.events.emit_lossy(PaddockEvent::SyncUnitFinished {
            run_id: run.run_id,
            unit: outcome.unit.clone(),
            ok: outcome.ok,
            error: outcome.error.clone(),
            timestamp: outcome.finished_at,
        });
        run.record_unit(outcome);
        Ok(())
    }

    async fn fail_run(
        &self,
        run: &mut SyncRun,
        error: UpstreamError,
    ) -> paddock_common::Result<()> {
        tracing::error!(
            run_id = %run.run_id,
            task = %run.task.label(),
            error = %error,
            "Sync run failed at fetch phase"
        );
        run.fail(error.to_string());
        Ok(())
    }

    async fn finish_cancelled(&self, mut run: SyncRun) -> paddock_common::Result<SyncRun> {
        self.finish_cancelled_in_place(&mut run).await?;
        Ok(run)
    }

    async fn finish_cancelled_in_place(&self, run: &mut SyncRun) -> paddock_common::Result<()> {
        tracing::info!(run_id = %run.run_id, "Sync run cancelled");
        run.transition_to(RunState::Cancelled);
        db::sync_runs::update_run(&self.db, run).await?;
        self.emit_finished(run);
        Ok(())
    }

    fn emit_finished(&self, run: &SyncRun) {
        self.events.emit_lossy(PaddockEvent::SyncRunFinished {
            run_id: run.run_id,
            state: run.state.as_str().to_string(),
            created: run.counts.created,
            updated: run.counts.updated,
            skipped: run.counts.skipped,
            failed_units: run.failed_units(),
            timestamp: chrono::Utc::now(),
        });
    }
}

/// Spawn the worker pool
///
/// Workers share one receiver behind a mutex: dispatch is serialized,
/// execution is parallel. Shutdown drains nothing; in-flight tasks observe
/// the cancellation token between units.
pub fn spawn_workers(
    orchestrator: Arc<SyncOrchestrator>,
    receiver: mpsc::UnboundedReceiver<QueuedTask>,
    workers: usize,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(receiver));

    (0..workers)
        .map(|worker_id| {
            let orchestrator = orchestrator.clone();
            let receiver = receiver.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                tracing::debug!(worker_id, "Sync worker started");
                loop {
                    let task = {
                        let mut rx = receiver.lock().await;
                        tokio::select! {
                            _ = cancel.cancelled() => None,
                            task = rx.recv() => task,
                        }
                    };

                    let Some(task) = task else {
                        break;
                    };

                    if let Err(e) = orchestrator.run_task(task, &cancel).await {
                        tracing::error!(worker_id, error = %e, "Sync run persistence failed");
                    }
                }
                tracing::debug!(worker_id, "Sync worker stopped");
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_backoff_grows_by_constant_steps() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff: Backoff::Linear {
                step: Duration::from_secs(2),
            },
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(6));
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff: Backoff::Exponential {
                initial: Duration::from_secs(2),
                max: Duration::from_secs(10),
            },
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(10));
    }

    #[test]
    fn settings_select_the_backoff_shape() {
        let mut settings = OrchestratorSettings::default();
        settings.retry_backoff = "linear".to_string();
        settings.retry_delay_ms = 1500;
        settings.retry_max_attempts = 2;

        let policy = RetryPolicy::from_settings(&settings);
        assert_eq!(policy.max_attempts, 2);
        assert!(matches!(
            policy.backoff,
            Backoff::Linear { step } if step == Duration::from_millis(1500)
        ));
    }

    #[tokio::test]
    async fn queue_delivers_in_order() {
        let (queue, mut rx) = TaskQueue::new();
        assert!(queue.enqueue(QueuedTask {
            task: TaskKind::SeriesMetadata,
            parent_run_id: None,
            force_refresh: false,
        }));
        assert!(queue.enqueue(QueuedTask {
            task: TaskKind::CurrentSeasons,
            parent_run_id: None,
            force_refresh: true,
        }));

        assert_eq!(rx.recv().await.unwrap().task, TaskKind::SeriesMetadata);
        assert_eq!(rx.recv().await.unwrap().task, TaskKind::CurrentSeasons);
    }

    #[test]
    fn enqueue_after_shutdown_reports_closed() {
        let (queue, rx) = TaskQueue::new();
        drop(rx);
        assert!(!queue.enqueue(QueuedTask {
            task: TaskKind::SeriesMetadata,
            parent_run_id: None,
            force_refresh: false,
        }));
    }
}
