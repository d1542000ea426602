//! Lazy recurrence engine
//!
//! Pattern occurrences are computed on demand from the stored descriptor
//! and are never persisted; fixed-times occurrences come from the
//! materialized `time_slots` rows. Callers get a uniform ascending stream
//! of UTC timestamps either way.
//!
//! Occurrence k of a pattern is
//! `season_start + first_session_offset + k * repeat_interval`, for
//! k = 0.. up to the session-count cap, bounded inclusively by
//! `min(season_end, window_end)`.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::db;
use crate::model::{Event, ScheduleDescriptor, Season};

/// Restartable iterator over the pattern occurrences inside a window
///
/// Cloning yields an independent iterator positioned at the clone point.
#[derive(Debug, Clone)]
pub struct PatternOccurrences {
    first: DateTime<Utc>,
    interval: Duration,
    /// Inclusive upper bound: min(season end, window end)
    horizon: DateTime<Utc>,
    session_count: Option<i64>,
    index: i64,
}

impl PatternOccurrences {
    /// Occurrences of a pattern intersected with `[window_start, window_end]`
    ///
    /// A non-positive interval yields an exhausted iterator; the reconciler
    /// rejects such descriptors before they are stored.
    pub fn new(
        season_start: DateTime<Utc>,
        season_end: DateTime<Utc>,
        first_session_offset_min: i64,
        repeat_interval_min: i64,
        session_count: Option<i64>,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Self {
        let first = season_start + Duration::minutes(first_session_offset_min);
        let horizon = season_end.min(window_end);

        if repeat_interval_min <= 0 {
            return Self {
                first,
                interval: Duration::minutes(1),
                horizon,
                session_count: Some(0),
                index: 0,
            };
        }

        let interval = Duration::minutes(repeat_interval_min);

        // Skip straight to the first occurrence at or after window_start
        let index = if window_start > first {
            let gap = (window_start - first).num_minutes();
            // Ceiling division; gap and interval are both positive here
            (gap + repeat_interval_min - 1) / repeat_interval_min
        } else {
            0
        };

        Self {
            first,
            interval,
            horizon,
            session_count,
            index,
        }
    }
}

impl Iterator for PatternOccurrences {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<DateTime<Utc>> {
        if let Some(count) = self.session_count {
            if self.index >= count {
                return None;
            }
        }

        let occurrence = self.first + self.interval * self.index as i32;
        if occurrence > self.horizon {
            return None;
        }

        self.index += 1;
        Some(occurrence)
    }
}

/// Uniform occurrence stream over both descriptor kinds
#[derive(Debug, Clone)]
pub enum Occurrences {
    Pattern(PatternOccurrences),
    Fixed(std::vec::IntoIter<DateTime<Utc>>),
}

impl Iterator for Occurrences {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<DateTime<Utc>> {
        match self {
            Occurrences::Pattern(iter) => iter.next(),
            Occurrences::Fixed(iter) => iter.next(),
        }
    }
}

/// Occurrences of one event inside `[window_start, window_end]`, ascending
///
/// Pattern events are derived arithmetically; fixed-times events read their
/// materialized `time_slots` rows. A window disjoint from the season yields
/// an empty stream.
pub async fn occurrences_in_window(
    pool: &SqlitePool,
    event: &Event,
    season: &Season,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<Occurrences, sqlx::Error> {
    match &event.schedule {
        ScheduleDescriptor::Pattern {
            first_session_offset_min,
            repeat_interval_min,
            session_count,
        } => Ok(Occurrences::Pattern(PatternOccurrences::new(
            season.starts_on,
            season.ends_on,
            *first_session_offset_min,
            *repeat_interval_min,
            *session_count,
            window_start,
            window_end,
        ))),
        ScheduleDescriptor::FixedTimes(_) => {
            let slots = db::slots::slots_in_window(pool, event.guid, window_start, window_end)
                .await?;
            let times: Vec<DateTime<Utc>> = slots.into_iter().map(|s| s.starts_at).collect();
            Ok(Occurrences::Fixed(times.into_iter()))
        }
    }
}
