//! Entity reconciler
//!
//! Idempotent upsert of normalized schedule payloads into the local entity
//! graph: Series → Season → Event → EventClass / CarRestriction /
//! TimeSlot. Purely a function of (existing DB state, incoming payload);
//! ordering between independent series/season units is commutative because
//! every unit upserts by stable external identifiers.
//!
//! Failure isolation: all writes for one round run in a single transaction,
//! and a round failure rolls back only that round. Season-level failures
//! (missing parent, immutability violation) fail the season fast without
//! touching sibling seasons.

use sqlx::error::ErrorKind;
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use crate::db;
use crate::model::{RunCounts, ScheduleDescriptor};
use crate::upstream::{RoundPayload, SeasonSchedulePayload, SeriesPayload};

/// Reconciliation errors, scoped to the smallest unit possible
///
/// None of these are retried automatically: they are terminal for their
/// unit and reported in the run summary.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The parent series of a season payload has not been synced yet
    #[error("Parent series {series_external_id} not found for season {season_external_id}")]
    MissingParent {
        series_external_id: i64,
        season_external_id: i64,
    },

    /// The round references a layout code missing from the reference table
    #[error("Unknown track layout code '{layout_code}'")]
    UnresolvedLayout { layout_code: String },

    /// Configuration error in the schedule descriptor, rejected here so it
    /// can never reach the recurrence engine
    #[error("Invalid schedule for round {round_number}: {reason}")]
    InvalidSchedule { round_number: i64, reason: String },

    /// Database uniqueness/foreign-key constraint rejected the write
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Any other database failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A failed unit within an otherwise-continuing reconcile pass
#[derive(Debug)]
pub struct UnitError {
    /// Unit identifier, e.g. `series:280` or `round:3`
    pub unit: String,
    pub error: ReconcileError,
}

/// Result of one reconcile pass
#[derive(Debug, Default)]
pub struct ReconcileSummary {
    pub counts: RunCounts,
    pub errors: Vec<UnitError>,
}

impl ReconcileSummary {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

fn map_db_err(e: sqlx::Error) -> ReconcileError {
    match e {
        sqlx::Error::Database(db)
            if matches!(
                db.kind(),
                ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation
            ) =>
        {
            ReconcileError::ConstraintViolation(db.message().to_string())
        }
        other => ReconcileError::Database(other),
    }
}

/// Reconciler service
///
/// Exclusively owns writes to the schedule entity graph.
pub struct Reconciler {
    db: SqlitePool,
}

impl Reconciler {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Upsert the full series listing, one unit per series
    ///
    /// A failing series never aborts its siblings.
    pub async fn reconcile_series_list(&self, payloads: &[SeriesPayload]) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        for payload in payloads {
            match self.reconcile_series(payload).await {
                Ok(counts) => summary.counts.merge(counts),
                Err(error) => {
                    tracing::warn!(
                        series_external_id = payload.external_id,
                        error = %error,
                        "Series reconcile failed"
                    );
                    summary.counts.skipped += 1;
                    summary.errors.push(UnitError {
                        unit: format!("series:{}", payload.external_id),
                        error,
                    });
                }
            }
        }

        summary
    }

    /// Upsert one series (a single atomic statement)
    pub async fn reconcile_series(&self, payload: &SeriesPayload) -> Result<RunCounts, ReconcileError> {
        let mut conn = self.db.acquire().await.map_err(map_db_err)?;
        let upserted = db::series::upsert_series(&mut conn, payload)
            .await
            .map_err(map_db_err)?;

        tracing::debug!(
            series_external_id = payload.external_id,
            created = upserted.created,
            "Series reconciled"
        );

        Ok(one(upserted.created))
    }

    /// Upsert one season and all its rounds
    ///
    /// Season-level failures return `Err` (the whole unit failed); round
    /// failures are collected in the summary while sibling rounds proceed.
    pub async fn reconcile_season(
        &self,
        payload: &SeasonSchedulePayload,
    ) -> Result<ReconcileSummary, ReconcileError> {
        // Parent must already exist; never silently create an orphan
        let series = db::series::load_series_by_external_id(&self.db, payload.series_external_id)
            .await
            .map_err(map_db_err)?
            .ok_or(ReconcileError::MissingParent {
                series_external_id: payload.series_external_id,
                season_external_id: payload.external_id,
            })?;

        // `season.series` is immutable once set
        if let Some(existing) =
            db::seasons::load_season_by_external_id(&self.db, payload.external_id)
                .await
                .map_err(map_db_err)?
        {
            if existing.series_id != series.guid {
                return Err(ReconcileError::ConstraintViolation(format!(
                    "season {} already belongs to a different series",
                    payload.external_id
                )));
            }
        }

        let mut summary = ReconcileSummary::default();

        let mut conn = self.db.acquire().await.map_err(map_db_err)?;
        let season = db::seasons::upsert_season(
            &mut conn,
            series.guid,
            payload.external_id,
            &payload.name,
            payload.active,
            payload.starts_on,
            payload.ends_on,
        )
        .await
        .map_err(map_db_err)?;
        drop(conn);
        summary.counts.merge(one(season.created));

        for round in &payload.rounds {
            match self.reconcile_round(season.guid, round).await {
                Ok(counts) => summary.counts.merge(counts),
                Err(error) => {
                    tracing::warn!(
                        season_external_id = payload.external_id,
                        round_number = round.round_number,
                        error = %error,
                        "Round reconcile failed, siblings continue"
                    );
                    summary.counts.skipped += 1;
                    summary.errors.push(UnitError {
                        unit: format!("round:{}", round.round_number),
                        error,
                    });
                }
            }
        }

        tracing::info!(
            season_external_id = payload.external_id,
            created = summary.counts.created,
            updated = summary.counts.updated,
            skipped = summary.counts.skipped,
            "Season reconciled"
        );

        Ok(summary)
    }

    /// All writes for one round as a single atomic unit
    ///
    /// Write order inside the transaction is Event before
    /// EventClass/CarRestriction/TimeSlot; a failure partway rolls back
    /// only this round.
    ///
    /// The layout lookup happens before the transaction so its first
    /// statement is a write: the write lock is then taken under the busy
    /// timeout instead of failing a read-to-write upgrade when another
    /// worker commits in between.
    async fn reconcile_round(
        &self,
        season_guid: Uuid,
        round: &RoundPayload,
    ) -> Result<RunCounts, ReconcileError> {
        validate_descriptor(round)?;

        let mut conn = self.db.acquire().await.map_err(map_db_err)?;
        let layout_guid = db::refdata::resolve_layout(&mut conn, &round.layout_code)
            .await
            .map_err(map_db_err)?
            .ok_or_else(|| ReconcileError::UnresolvedLayout {
                layout_code: round.layout_code.clone(),
            })?;
        drop(conn);

        let mut counts = RunCounts::default();
        let mut tx = self.db.begin().await.map_err(map_db_err)?;

        let event = db::events::upsert_event(
            &mut tx,
            season_guid,
            round.round_number,
            layout_guid,
            round.weather.as_ref(),
            &round.schedule,
        )
        .await
        .map_err(map_db_err)?;
        counts.merge(one(event.created));

        // Replace the descriptor's materialization wholesale: a kind change
        // must never leave artifacts of the old kind behind
        match &round.schedule {
            ScheduleDescriptor::FixedTimes(times) => {
                let (created, _deleted) =
                    db::events::replace_time_slots(&mut tx, event.guid, times)
                        .await
                        .map_err(map_db_err)?;
                counts.created += created;
            }
            ScheduleDescriptor::Pattern { .. } => {
                db::events::clear_time_slots(&mut tx, event.guid)
                    .await
                    .map_err(map_db_err)?;
            }
        }

        for (order, class_id) in round.car_class_ids.iter().enumerate() {
            let upserted =
                db::classes::upsert_event_class(&mut tx, event.guid, *class_id, order as i64)
                    .await
                    .map_err(map_db_err)?;
            counts.merge(one(upserted.created));
        }

        for restriction in &round.restrictions {
            let upserted = db::classes::upsert_car_restriction(&mut tx, event.guid, restriction)
                .await
                .map_err(map_db_err)?;
            counts.merge(one(upserted.created));
        }

        tx.commit().await.map_err(map_db_err)?;
        Ok(counts)
    }
}

/// Reject configuration errors before any write begins
fn validate_descriptor(round: &RoundPayload) -> Result<(), ReconcileError> {
    match &round.schedule {
        ScheduleDescriptor::Pattern {
            first_session_offset_min,
            repeat_interval_min,
            session_count,
        } => {
            if *repeat_interval_min <= 0 {
                return Err(ReconcileError::InvalidSchedule {
                    round_number: round.round_number,
                    reason: format!("repeat interval must be positive, got {repeat_interval_min}"),
                });
            }
            if *first_session_offset_min < 0 {
                return Err(ReconcileError::InvalidSchedule {
                    round_number: round.round_number,
                    reason: format!("first session offset must not be negative, got {first_session_offset_min}"),
                });
            }
            if let Some(count) = session_count {
                if *count <= 0 {
                    return Err(ReconcileError::InvalidSchedule {
                        round_number: round.round_number,
                        reason: format!("session count must be positive, got {count}"),
                    });
                }
            }
        }
        ScheduleDescriptor::FixedTimes(times) => {
            if times.is_empty() {
                return Err(ReconcileError::InvalidSchedule {
                    round_number: round.round_number,
                    reason: "fixed-times schedule has no timestamps".to_string(),
                });
            }
        }
    }
    Ok(())
}

fn one(created: bool) -> RunCounts {
    if created {
        RunCounts { created: 1, updated: 0, skipped: 0 }
    } else {
        RunCounts { created: 0, updated: 1, skipped: 0 }
    }
}
