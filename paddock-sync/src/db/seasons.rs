//! Season persistence

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{parse_guid, Upserted};
use crate::model::Season;

/// Upsert a season by its upstream identifier
///
/// `series_id` is written only on insert; the `DO UPDATE` arm never
/// touches it, so the parent series of an existing season is immutable
/// (the reconciler additionally rejects payloads that try to move a
/// season before calling this).
pub async fn upsert_season(
    conn: &mut SqliteConnection,
    series_guid: Uuid,
    external_id: i64,
    name: &str,
    active: bool,
    starts_on: DateTime<Utc>,
    ends_on: DateTime<Utc>,
) -> Result<Upserted, sqlx::Error> {
    let candidate = Uuid::new_v4();
    let guid: String = sqlx::query_scalar(
        r#"
        INSERT INTO seasons
            (guid, external_id, series_id, name, active, starts_on,
             ends_on, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        ON CONFLICT(external_id) DO UPDATE SET
            name = excluded.name,
            active = excluded.active,
            starts_on = excluded.starts_on,
            ends_on = excluded.ends_on,
            updated_at = CURRENT_TIMESTAMP
        RETURNING guid
        "#,
    )
    .bind(candidate.to_string())
    .bind(external_id)
    .bind(series_guid.to_string())
    .bind(name)
    .bind(active)
    .bind(starts_on)
    .bind(ends_on)
    .fetch_one(&mut *conn)
    .await?;

    let guid = parse_guid(&guid)?;
    Ok(Upserted { guid, created: guid == candidate })
}

fn season_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Season, sqlx::Error> {
    let guid: String = row.get("guid");
    let series_id: String = row.get("series_id");

    Ok(Season {
        guid: parse_guid(&guid)?,
        external_id: row.get("external_id"),
        series_id: parse_guid(&series_id)?,
        name: row.get("name"),
        active: row.get("active"),
        starts_on: row.get("starts_on"),
        ends_on: row.get("ends_on"),
    })
}

/// Load a season by its upstream identifier
pub async fn load_season_by_external_id(
    pool: &SqlitePool,
    external_id: i64,
) -> Result<Option<Season>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT guid, external_id, series_id, name, active, starts_on, ends_on
        FROM seasons
        WHERE external_id = ?
        "#,
    )
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(season_from_row).transpose()
}

/// Load a season by row guid
pub async fn load_season(pool: &SqlitePool, guid: Uuid) -> Result<Option<Season>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT guid, external_id, series_id, name, active, starts_on, ends_on
        FROM seasons
        WHERE guid = ?
        "#,
    )
    .bind(guid.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(season_from_row).transpose()
}

/// Number of season rows (test and diagnostics helper)
pub async fn count_seasons(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM seasons").fetch_one(pool).await
}
