//! Sync-run state machine
//!
//! Every sync task execution progresses through:
//! QUEUED → FETCHING → RECONCILING → COMPLETED | PARTIALLY_FAILED | FAILED
//! (CANCELLED may replace any non-terminal state between units).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sync run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Waiting for a worker
    Queued,
    /// Upstream call(s) in flight
    Fetching,
    /// Fan-out to reconciler units
    Reconciling,
    /// Zero unit-level errors
    Completed,
    /// At least one unit failed, siblings completed
    PartiallyFailed,
    /// The run as a whole could not proceed (e.g. fetch exhausted retries)
    Failed,
    /// Cancelled between units
    Cancelled,
}

impl RunState {
    /// Storage label
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Queued => "QUEUED",
            RunState::Fetching => "FETCHING",
            RunState::Reconciling => "RECONCILING",
            RunState::Completed => "COMPLETED",
            RunState::PartiallyFailed => "PARTIALLY_FAILED",
            RunState::Failed => "FAILED",
            RunState::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::PartiallyFailed | RunState::Failed | RunState::Cancelled
        )
    }
}

/// The three scheduled task shapes plus the two fan-out / admin shapes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// One upstream call, one reconciler pass over the full series list
    SeriesMetadata,
    /// One upstream call returning seasons+schedules for all series,
    /// fanned out to one reconciler invocation per season
    CurrentSeasons,
    /// Enumerate past seasons per series and queue one child
    /// `SeasonSchedule` task per season found
    PastSeasons,
    /// Fetch and reconcile the full schedule of one season; child of
    /// `PastSeasons` or an administrative per-season resync
    SeasonSchedule { season_external_id: i64 },
    /// Administrative per-series resync: refresh metadata of one series
    SeriesRefresh { series_external_id: i64 },
}

impl TaskKind {
    /// Storage / logging label
    pub fn label(&self) -> String {
        match self {
            TaskKind::SeriesMetadata => "series-metadata".to_string(),
            TaskKind::CurrentSeasons => "current-seasons".to_string(),
            TaskKind::PastSeasons => "past-seasons".to_string(),
            TaskKind::SeasonSchedule { season_external_id } => {
                format!("season-schedule:{season_external_id}")
            }
            TaskKind::SeriesRefresh { series_external_id } => {
                format!("series-refresh:{series_external_id}")
            }
        }
    }
}

/// A task waiting in the queue
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task: TaskKind,
    /// Set for fan-out children so partial-failure reporting can reference
    /// the spawning run
    pub parent_run_id: Option<Uuid>,
    /// Bypass the cache gateway (administrative force refresh)
    pub force_refresh: bool,
}

/// Entity-write counters aggregated across a run or unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub created: u64,
    pub updated: u64,
    /// Units skipped because of a unit-level error
    pub skipped: u64,
}

impl RunCounts {
    pub fn merge(&mut self, other: RunCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
    }
}

/// Outcome of one reconcile unit (one series, one season, or one round)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub unit: String,
    pub ok: bool,
    pub counts: RunCounts,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl UnitOutcome {
    pub fn ok(unit: String, counts: RunCounts) -> Self {
        Self {
            unit,
            ok: true,
            counts,
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(unit: String, error: String) -> Self {
        Self {
            unit,
            ok: false,
            counts: RunCounts::default(),
            error: Some(error),
            finished_at: Utc::now(),
        }
    }
}

/// One sync run (in-memory state, persisted to `sync_runs`/`sync_units`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub run_id: Uuid,
    pub task: TaskKind,
    pub parent_run_id: Option<Uuid>,
    pub state: RunState,
    pub counts: RunCounts,
    pub units: Vec<UnitOutcome>,
    /// Run-level failure reason (unit-level reasons live in `units`)
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SyncRun {
    pub fn new(task: TaskKind, parent_run_id: Option<Uuid>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            task,
            parent_run_id,
            state: RunState::Queued,
            counts: RunCounts::default(),
            units: Vec::new(),
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Transition to a new state, stamping `ended_at` for terminal states
    pub fn transition_to(&mut self, new_state: RunState) {
        self.state = new_state;
        if new_state.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
    }

    /// Record a unit outcome, folding its counts into the run totals
    pub fn record_unit(&mut self, unit: UnitOutcome) {
        self.counts.merge(unit.counts);
        self.units.push(unit);
    }

    /// Identifiers of units that failed
    pub fn failed_units(&self) -> Vec<String> {
        self.units
            .iter()
            .filter(|u| !u.ok)
            .map(|u| u.unit.clone())
            .collect()
    }

    /// Terminal state for a finished fan-out: Completed only with zero
    /// unit-level errors
    pub fn finish(&mut self) {
        let state = if self.failed_units().is_empty() {
            RunState::Completed
        } else {
            RunState::PartiallyFailed
        };
        self.transition_to(state);
    }

    /// Mark the run as failed at run level
    pub fn fail(&mut self, error: String) {
        self.error = Some(error);
        self.transition_to(RunState::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_through_completed() {
        let mut run = SyncRun::new(TaskKind::SeriesMetadata, None);
        assert_eq!(run.state, RunState::Queued);
        assert!(run.ended_at.is_none());

        run.transition_to(RunState::Fetching);
        run.transition_to(RunState::Reconciling);
        run.record_unit(UnitOutcome::ok(
            "series:280".to_string(),
            RunCounts { created: 1, updated: 0, skipped: 0 },
        ));
        run.finish();

        assert_eq!(run.state, RunState::Completed);
        assert!(run.ended_at.is_some());
        assert_eq!(run.counts.created, 1);
    }

    #[test]
    fn one_failed_unit_means_partially_failed() {
        let mut run = SyncRun::new(TaskKind::CurrentSeasons, None);
        run.transition_to(RunState::Fetching);
        run.transition_to(RunState::Reconciling);
        run.record_unit(UnitOutcome::ok(
            "season:4501".to_string(),
            RunCounts { created: 3, updated: 2, skipped: 0 },
        ));
        run.record_unit(UnitOutcome::failed(
            "season:4502".to_string(),
            "unknown track layout code 'nowhere'".to_string(),
        ));
        run.finish();

        assert_eq!(run.state, RunState::PartiallyFailed);
        assert_eq!(run.failed_units(), vec!["season:4502".to_string()]);
    }

    #[test]
    fn task_labels_are_stable() {
        assert_eq!(TaskKind::SeriesMetadata.label(), "series-metadata");
        assert_eq!(
            TaskKind::SeasonSchedule { season_external_id: 4501 }.label(),
            "season-schedule:4501"
        );
    }
}
