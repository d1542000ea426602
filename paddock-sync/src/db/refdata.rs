//! Reference-data lookups (track layouts, car classes)
//!
//! These tables are populated by the out-of-scope import job; the sync
//! engine only resolves against them. The insert helpers exist for tests
//! and administrative seeding.

use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::parse_guid;
use crate::model::TrackLayout;

/// Resolve a track layout by its upstream layout code
///
/// Returns `None` for unknown codes; the reconciler turns that into an
/// `UnresolvedLayout` error scoped to the round.
pub async fn resolve_layout(
    conn: &mut SqliteConnection,
    layout_code: &str,
) -> Result<Option<Uuid>, sqlx::Error> {
    let guid: Option<String> =
        sqlx::query_scalar("SELECT guid FROM track_layouts WHERE layout_code = ?")
            .bind(layout_code)
            .fetch_optional(&mut *conn)
            .await?;

    guid.as_deref().map(parse_guid).transpose()
}

/// Load a full layout row
pub async fn load_layout(
    pool: &SqlitePool,
    layout_code: &str,
) -> Result<Option<TrackLayout>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT guid, layout_code, track_name, layout_name FROM track_layouts WHERE layout_code = ?",
    )
    .bind(layout_code)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let guid: String = row.get("guid");
            Ok(Some(TrackLayout {
                guid: parse_guid(&guid)?,
                layout_code: row.get("layout_code"),
                track_name: row.get("track_name"),
                layout_name: row.get("layout_name"),
            }))
        }
        None => Ok(None),
    }
}

/// Insert a track layout (seeding helper)
pub async fn insert_layout(
    pool: &SqlitePool,
    layout_code: &str,
    track_name: &str,
    layout_name: Option<&str>,
) -> Result<Uuid, sqlx::Error> {
    let guid = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO track_layouts (guid, layout_code, track_name, layout_name) VALUES (?, ?, ?, ?)",
    )
    .bind(guid.to_string())
    .bind(layout_code)
    .bind(track_name)
    .bind(layout_name)
    .execute(pool)
    .await?;
    Ok(guid)
}

/// Insert a car class (seeding helper)
pub async fn insert_car_class(
    pool: &SqlitePool,
    external_id: i64,
    name: &str,
) -> Result<Uuid, sqlx::Error> {
    let guid = Uuid::new_v4();
    sqlx::query("INSERT INTO car_classes (guid, external_id, name) VALUES (?, ?, ?)")
        .bind(guid.to_string())
        .bind(external_id)
        .bind(name)
        .execute(pool)
        .await?;
    Ok(guid)
}
