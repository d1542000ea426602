//! Event (round) persistence, including schedule descriptor storage
//!
//! The descriptor is stored flattened: `schedule_kind` plus pattern columns
//! (NULL for fixed events). Fixed-times timestamps live in `time_slots`
//! rows managed by [`replace_time_slots`] / [`clear_time_slots`].

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{parse_guid, Upserted};
use crate::model::{Event, ScheduleDescriptor};

/// Upsert an event by `(season, round_number)`
///
/// The incoming descriptor replaces the stored one wholesale: writing a
/// pattern clears all fixed columns and vice versa, so a kind change never
/// leaves fields of the old kind behind.
pub async fn upsert_event(
    conn: &mut SqliteConnection,
    season_guid: Uuid,
    round_number: i64,
    layout_guid: Uuid,
    weather: Option<&serde_json::Value>,
    schedule: &ScheduleDescriptor,
) -> Result<Upserted, sqlx::Error> {
    let (offset, interval, count) = match schedule {
        ScheduleDescriptor::Pattern {
            first_session_offset_min,
            repeat_interval_min,
            session_count,
        } => (
            Some(*first_session_offset_min),
            Some(*repeat_interval_min),
            *session_count,
        ),
        ScheduleDescriptor::FixedTimes(_) => (None, None, None),
    };
    let weather_json = weather.map(|w| w.to_string());

    let candidate = Uuid::new_v4();
    let guid: String = sqlx::query_scalar(
        r#"
        INSERT INTO events
            (guid, season_id, round_number, layout_id, weather,
             schedule_kind, first_session_offset_min,
             repeat_interval_min, session_count, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        ON CONFLICT(season_id, round_number) DO UPDATE SET
            layout_id = excluded.layout_id,
            weather = excluded.weather,
            schedule_kind = excluded.schedule_kind,
            first_session_offset_min = excluded.first_session_offset_min,
            repeat_interval_min = excluded.repeat_interval_min,
            session_count = excluded.session_count,
            updated_at = CURRENT_TIMESTAMP
        RETURNING guid
        "#,
    )
    .bind(candidate.to_string())
    .bind(season_guid.to_string())
    .bind(round_number)
    .bind(layout_guid.to_string())
    .bind(&weather_json)
    .bind(schedule.kind())
    .bind(offset)
    .bind(interval)
    .bind(count)
    .fetch_one(&mut *conn)
    .await?;

    let guid = parse_guid(&guid)?;
    Ok(Upserted { guid, created: guid == candidate })
}

/// Make the stored time slots match `times` exactly
///
/// Slots already present keep their guid (other subsystems reference it);
/// new timestamps are inserted; slots whose timestamp is absent from the
/// incoming list are deleted — a fixed-times payload is the complete
/// schedule for its round.
///
/// Returns (created, deleted) row counts.
pub async fn replace_time_slots(
    conn: &mut SqliteConnection,
    event_guid: Uuid,
    times: &[DateTime<Utc>],
) -> Result<(u64, u64), sqlx::Error> {
    let existing: Vec<DateTime<Utc>> =
        sqlx::query_scalar("SELECT starts_at FROM time_slots WHERE event_id = ?")
            .bind(event_guid.to_string())
            .fetch_all(&mut *conn)
            .await?;

    let mut created = 0u64;
    for t in times {
        if !existing.contains(t) {
            sqlx::query("INSERT INTO time_slots (guid, event_id, starts_at) VALUES (?, ?, ?)")
                .bind(Uuid::new_v4().to_string())
                .bind(event_guid.to_string())
                .bind(t)
                .execute(&mut *conn)
                .await?;
            created += 1;
        }
    }

    let mut deleted = 0u64;
    for t in &existing {
        if !times.contains(t) {
            sqlx::query("DELETE FROM time_slots WHERE event_id = ? AND starts_at = ?")
                .bind(event_guid.to_string())
                .bind(t)
                .execute(&mut *conn)
                .await?;
            deleted += 1;
        }
    }

    Ok((created, deleted))
}

/// Remove all time slots for an event (fixed → pattern conversion)
pub async fn clear_time_slots(
    conn: &mut SqliteConnection,
    event_guid: Uuid,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM time_slots WHERE event_id = ?")
        .bind(event_guid.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Load an event by `(season, round_number)`, populating fixed times from
/// `time_slots` when the stored kind is fixed
pub async fn load_event(
    pool: &SqlitePool,
    season_guid: Uuid,
    round_number: i64,
) -> Result<Option<Event>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT guid, season_id, round_number, layout_id, weather,
               schedule_kind, first_session_offset_min, repeat_interval_min,
               session_count
        FROM events
        WHERE season_id = ? AND round_number = ?
        "#,
    )
    .bind(season_guid.to_string())
    .bind(round_number)
    .fetch_optional(pool)
    .await?;

    let row = match row {
        Some(row) => row,
        None => return Ok(None),
    };

    let guid: String = row.get("guid");
    let guid = parse_guid(&guid)?;
    let season_id: String = row.get("season_id");
    let layout_id: String = row.get("layout_id");
    let kind: String = row.get("schedule_kind");

    let schedule = match kind.as_str() {
        "pattern" => ScheduleDescriptor::Pattern {
            first_session_offset_min: row.get("first_session_offset_min"),
            repeat_interval_min: row.get("repeat_interval_min"),
            session_count: row.get("session_count"),
        },
        _ => {
            let times: Vec<DateTime<Utc>> = sqlx::query_scalar(
                "SELECT starts_at FROM time_slots WHERE event_id = ? ORDER BY starts_at",
            )
            .bind(guid.to_string())
            .fetch_all(pool)
            .await?;
            ScheduleDescriptor::FixedTimes(times)
        }
    };

    let weather: Option<String> = row.get("weather");

    Ok(Some(Event {
        guid,
        season_id: parse_guid(&season_id)?,
        round_number: row.get("round_number"),
        layout_id: parse_guid(&layout_id)?,
        weather: weather.and_then(|w| serde_json::from_str(&w).ok()),
        schedule,
    }))
}

/// Number of event rows for a season (test and diagnostics helper)
pub async fn count_events(pool: &SqlitePool, season_guid: Uuid) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE season_id = ?")
        .bind(season_guid.to_string())
        .fetch_one(pool)
        .await
}
