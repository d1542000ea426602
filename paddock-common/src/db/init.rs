//! Database initialization
//!
//! Creates the schedule entity graph and sync audit tables on first run.
//! All `create_*_table` functions are idempotent (`CREATE TABLE IF NOT
//! EXISTS`) and safe to call at every startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
///
/// Pragmas are carried in the connect options so every connection the pool
/// opens gets them, not just the first: WAL mode allows concurrent readers
/// while one sync worker writes, and the busy timeout covers write
/// contention between workers.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_all_tables(&pool).await?;

    Ok(pool)
}

/// Create every paddock table (idempotent)
pub async fn create_all_tables(pool: &SqlitePool) -> Result<()> {
    // Reference tables (populated by the out-of-scope import job,
    // read-only for the sync engine)
    create_track_layouts_table(pool).await?;
    create_car_classes_table(pool).await?;

    // Schedule entity graph
    create_series_table(pool).await?;
    create_seasons_table(pool).await?;
    create_events_table(pool).await?;
    create_event_classes_table(pool).await?;
    create_car_restrictions_table(pool).await?;
    create_time_slots_table(pool).await?;

    // Sync audit log
    create_sync_runs_table(pool).await?;
    create_sync_units_table(pool).await?;

    info!("Database tables initialized");
    Ok(())
}

/// Track layout reference table, keyed by the upstream layout code
pub async fn create_track_layouts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS track_layouts (
            guid TEXT PRIMARY KEY,
            layout_code TEXT NOT NULL UNIQUE,
            track_name TEXT NOT NULL,
            layout_name TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Car class reference table
pub async fn create_car_classes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS car_classes (
            guid TEXT PRIMARY KEY,
            external_id INTEGER NOT NULL UNIQUE,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Championship series, keyed by the stable upstream identifier
pub async fn create_series_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS series (
            guid TEXT PRIMARY KEY,
            external_id INTEGER NOT NULL UNIQUE,
            name TEXT NOT NULL,
            license_tier TEXT,
            multiclass INTEGER NOT NULL DEFAULT 0,
            allowed_class_ids TEXT NOT NULL DEFAULT '[]',
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Seasons: one periodic instantiation of a series
pub async fn create_seasons_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS seasons (
            guid TEXT PRIMARY KEY,
            external_id INTEGER NOT NULL UNIQUE,
            series_id TEXT NOT NULL REFERENCES series(guid),
            name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            starts_on TEXT NOT NULL,
            ends_on TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Events (rounds): one scheduled race week within a season
///
/// The schedule descriptor is a tagged union flattened into columns:
/// `schedule_kind` is 'pattern' or 'fixed'; pattern fields are NULL for
/// fixed events and vice versa (fixed events own rows in `time_slots`).
pub async fn create_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            guid TEXT PRIMARY KEY,
            season_id TEXT NOT NULL REFERENCES seasons(guid),
            round_number INTEGER NOT NULL,
            layout_id TEXT NOT NULL REFERENCES track_layouts(guid),
            weather TEXT,
            schedule_kind TEXT NOT NULL CHECK (schedule_kind IN ('pattern', 'fixed')),
            first_session_offset_min INTEGER,
            repeat_interval_min INTEGER,
            session_count INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(season_id, round_number)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Car classes permitted within an event, with multi-class display order
pub async fn create_event_classes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_classes (
            guid TEXT PRIMARY KEY,
            event_id TEXT NOT NULL REFERENCES events(guid) ON DELETE CASCADE,
            car_class_id INTEGER NOT NULL,
            display_order INTEGER NOT NULL DEFAULT 0,
            UNIQUE(event_id, car_class_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Balance-of-performance adjustments for one car within one event
pub async fn create_car_restrictions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS car_restrictions (
            guid TEXT PRIMARY KEY,
            event_id TEXT NOT NULL REFERENCES events(guid) ON DELETE CASCADE,
            car_id INTEGER NOT NULL,
            max_pct_fuel_fill REAL,
            max_dry_tire_sets INTEGER,
            power_adjust_pct REAL,
            weight_penalty_kg REAL,
            fixed_setup TEXT,
            UNIQUE(event_id, car_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Materialized time slots for fixed-times events
///
/// Pattern events never get rows here; their occurrences are computed on
/// demand. Fixed-times slots carry persistent identity so signups and
/// results can reference them.
pub async fn create_time_slots_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS time_slots (
            guid TEXT PRIMARY KEY,
            event_id TEXT NOT NULL REFERENCES events(guid) ON DELETE CASCADE,
            starts_at TEXT NOT NULL,
            UNIQUE(event_id, starts_at)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Sync run audit log, one row per task execution
pub async fn create_sync_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            run_id TEXT PRIMARY KEY,
            task TEXT NOT NULL,
            parent_run_id TEXT REFERENCES sync_runs(run_id),
            state TEXT NOT NULL,
            created INTEGER NOT NULL DEFAULT 0,
            updated INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            started_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Per-unit outcomes within a sync run (one season, one round, one series)
pub async fn create_sync_units_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_units (
            guid TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES sync_runs(run_id) ON DELETE CASCADE,
            unit TEXT NOT NULL,
            outcome TEXT NOT NULL CHECK (outcome IN ('ok', 'failed')),
            created INTEGER NOT NULL DEFAULT 0,
            updated INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            finished_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_all_tables_is_idempotent() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        create_all_tables(&pool).await.unwrap();
        // Second pass must not fail
        create_all_tables(&pool).await.unwrap();

        // Spot-check one table is usable
        sqlx::query("INSERT INTO track_layouts (guid, layout_code, track_name) VALUES ('g1', 'spa-gp', 'Spa-Francorchamps')")
            .execute(&pool)
            .await
            .unwrap();
    }
}
