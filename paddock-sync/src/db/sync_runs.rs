//! Sync run audit log persistence
//!
//! One `sync_runs` row per task execution plus one `sync_units` row per
//! reconcile unit, linked parent→child for fan-out tasks so
//! partial-failure reporting can reference exact units across restarts.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::parse_guid;
use crate::model::{RunCounts, SyncRun, UnitOutcome};

/// Persisted view of a sync run (without its unit list)
#[derive(Debug, Clone)]
pub struct SyncRunRow {
    pub run_id: Uuid,
    pub task: String,
    pub parent_run_id: Option<Uuid>,
    pub state: String,
    pub counts: RunCounts,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Insert the initial row for a queued run
pub async fn insert_run(pool: &SqlitePool, run: &SyncRun) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO sync_runs (run_id, task, parent_run_id, state, started_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(run.run_id.to_string())
    .bind(run.task.label())
    .bind(run.parent_run_id.map(|id| id.to_string()))
    .bind(run.state.as_str())
    .bind(run.started_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Persist the current state, counts and outcome of a run
pub async fn update_run(pool: &SqlitePool, run: &SyncRun) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE sync_runs
        SET state = ?, created = ?, updated = ?, skipped = ?, error = ?, ended_at = ?
        WHERE run_id = ?
        "#,
    )
    .bind(run.state.as_str())
    .bind(run.counts.created as i64)
    .bind(run.counts.updated as i64)
    .bind(run.counts.skipped as i64)
    .bind(&run.error)
    .bind(run.ended_at)
    .bind(run.run_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Record one unit outcome under a run
pub async fn insert_unit(
    pool: &SqlitePool,
    run_id: Uuid,
    unit: &UnitOutcome,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO sync_units
            (guid, run_id, unit, outcome, created, updated, skipped, error, finished_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(run_id.to_string())
    .bind(&unit.unit)
    .bind(if unit.ok { "ok" } else { "failed" })
    .bind(unit.counts.created as i64)
    .bind(unit.counts.updated as i64)
    .bind(unit.counts.skipped as i64)
    .bind(&unit.error)
    .bind(unit.finished_at)
    .execute(pool)
    .await?;
    Ok(())
}

fn run_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SyncRunRow, sqlx::Error> {
    let run_id: String = row.get("run_id");
    let parent: Option<String> = row.get("parent_run_id");

    Ok(SyncRunRow {
        run_id: parse_guid(&run_id)?,
        task: row.get("task"),
        parent_run_id: parent.as_deref().map(parse_guid).transpose()?,
        state: row.get("state"),
        counts: RunCounts {
            created: row.get::<i64, _>("created") as u64,
            updated: row.get::<i64, _>("updated") as u64,
            skipped: row.get::<i64, _>("skipped") as u64,
        },
        error: row.get("error"),
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
    })
}

/// Load one run by id
pub async fn load_run(pool: &SqlitePool, run_id: Uuid) -> Result<Option<SyncRunRow>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT run_id, task, parent_run_id, state, created, updated, skipped,
               error, started_at, ended_at
        FROM sync_runs
        WHERE run_id = ?
        "#,
    )
    .bind(run_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(run_from_row).transpose()
}

/// Child runs spawned by a fan-out parent
pub async fn load_child_runs(
    pool: &SqlitePool,
    parent_run_id: Uuid,
) -> Result<Vec<SyncRunRow>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT run_id, task, parent_run_id, state, created, updated, skipped,
               error, started_at, ended_at
        FROM sync_runs
        WHERE parent_run_id = ?
        ORDER BY started_at
        "#,
    )
    .bind(parent_run_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(run_from_row).collect()
}

/// Most recent runs, newest first (admin summary query)
pub async fn load_recent_runs(pool: &SqlitePool, limit: i64) -> Result<Vec<SyncRunRow>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT run_id, task, parent_run_id, state, created, updated, skipped,
               error, started_at, ended_at
        FROM sync_runs
        ORDER BY started_at DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(run_from_row).collect()
}

/// Mark runs left non-terminal by a crash as failed
///
/// Every task shape is idempotent, so the next scheduled trigger redoes
/// the work; this only keeps the audit log honest across restarts.
pub async fn mark_interrupted_runs(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE sync_runs
        SET state = 'FAILED', error = 'interrupted by service restart',
            ended_at = ?
        WHERE state IN ('QUEUED', 'FETCHING', 'RECONCILING')
        "#,
    )
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
