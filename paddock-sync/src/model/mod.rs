//! Entity graph and sync-run models
//!
//! Series, Season, Event, EventClass, CarRestriction and TimeSlot rows are
//! exclusively owned and mutated by the reconciler during sync; other
//! subsystems read them and may attach their own foreign references.

pub mod sync_run;

pub use sync_run::{QueuedTask, RunCounts, RunState, SyncRun, TaskKind, UnitOutcome};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A championship definition, stable across many periodic seasons
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    pub guid: Uuid,
    /// Stable upstream identifier; globally unique, never rewritten
    pub external_id: i64,
    pub name: String,
    pub license_tier: Option<String>,
    pub multiclass: bool,
    pub allowed_class_ids: Vec<i64>,
    /// Upstream retirement clears this flag; rows are never deleted
    pub active: bool,
}

/// One periodic (e.g. quarterly) instantiation of a series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Season {
    pub guid: Uuid,
    pub external_id: i64,
    /// Immutable once set
    pub series_id: Uuid,
    pub name: String,
    pub active: bool,
    pub starts_on: DateTime<Utc>,
    pub ends_on: DateTime<Utc>,
}

/// Schedule descriptor: how occurrences of a round are derived
///
/// Exactly one kind is stored per event. A sync may convert one kind into
/// the other; the reconciler replaces the descriptor wholesale, never
/// merges the two.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleDescriptor {
    /// Fixed cadence across the season window. Occurrences are computed on
    /// demand by the recurrence engine and never persisted.
    Pattern {
        /// Offset of the first session from the season start
        first_session_offset_min: i64,
        /// Spacing between sessions; rejected at reconcile time if zero
        repeat_interval_min: i64,
        /// Cap on the number of sessions; None = bounded only by the season
        session_count: Option<i64>,
    },
    /// Irregular one-off schedule. Each timestamp is materialized as a
    /// `time_slots` row with persistent identity.
    FixedTimes(Vec<DateTime<Utc>>),
}

impl ScheduleDescriptor {
    /// Storage tag for the descriptor kind
    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleDescriptor::Pattern { .. } => "pattern",
            ScheduleDescriptor::FixedTimes(_) => "fixed",
        }
    }
}

/// One scheduled round within a season (historically "race week")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub guid: Uuid,
    pub season_id: Uuid,
    pub round_number: i64,
    pub layout_id: Uuid,
    /// Opaque weather-configuration payload from upstream
    pub weather: Option<serde_json::Value>,
    pub schedule: ScheduleDescriptor,
}

/// A car class permitted within an event, ordered for multi-class display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventClass {
    pub guid: Uuid,
    pub event_id: Uuid,
    pub car_class_id: i64,
    pub display_order: i64,
}

/// Balance-of-performance adjustment for one car within one event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarRestriction {
    pub guid: Uuid,
    pub event_id: Uuid,
    pub car_id: i64,
    pub max_pct_fuel_fill: Option<f64>,
    pub max_dry_tire_sets: Option<i64>,
    pub power_adjust_pct: Option<f64>,
    pub weight_penalty_kg: Option<f64>,
    pub fixed_setup: Option<String>,
}

/// A materialized occurrence of a fixed-times event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlot {
    pub guid: Uuid,
    pub event_id: Uuid,
    pub starts_at: DateTime<Utc>,
}

/// A track layout reference row, resolved by upstream layout code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackLayout {
    pub guid: Uuid,
    pub layout_code: String,
    pub track_name: String,
    pub layout_name: Option<String>,
}
