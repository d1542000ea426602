//! Time slot queries for fixed-times events
//!
//! Writes go through `db::events::replace_time_slots` inside the round
//! transaction; this module only reads.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::parse_guid;
use crate::model::TimeSlot;

/// Slots for one event falling inside `[window_start, window_end]`
pub async fn slots_in_window(
    pool: &SqlitePool,
    event_guid: Uuid,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<Vec<TimeSlot>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT guid, event_id, starts_at
        FROM time_slots
        WHERE event_id = ? AND starts_at >= ? AND starts_at <= ?
        ORDER BY starts_at
        "#,
    )
    .bind(event_guid.to_string())
    .bind(window_start)
    .bind(window_end)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let guid: String = row.get("guid");
            let event_id: String = row.get("event_id");
            Ok(TimeSlot {
                guid: parse_guid(&guid)?,
                event_id: parse_guid(&event_id)?,
                starts_at: row.get("starts_at"),
            })
        })
        .collect()
}

/// All slots for one event (test and diagnostics helper)
pub async fn load_slots(pool: &SqlitePool, event_guid: Uuid) -> Result<Vec<TimeSlot>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT guid, event_id, starts_at FROM time_slots WHERE event_id = ? ORDER BY starts_at",
    )
    .bind(event_guid.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let guid: String = row.get("guid");
            let event_id: String = row.get("event_id");
            Ok(TimeSlot {
                guid: parse_guid(&guid)?,
                event_id: parse_guid(&event_id)?,
                starts_at: row.get("starts_at"),
            })
        })
        .collect()
}
