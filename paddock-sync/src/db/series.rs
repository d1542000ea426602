//! Series persistence

use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{parse_guid, Upserted};
use crate::model::Series;
use crate::upstream::SeriesPayload;

/// Upsert a series by its stable upstream identifier
///
/// Creates on first sight; thereafter updates mutable fields only. The
/// `external_id` key is never rewritten and rows are never deleted
/// (upstream retirement clears `active` via the payload flag).
///
/// One `ON CONFLICT` statement, no read before the write: concurrent
/// workers serialize on the row instead of racing a select-then-insert.
/// The returned guid only matches the fresh candidate when the insert arm
/// ran, which is how `created` is derived.
pub async fn upsert_series(
    conn: &mut SqliteConnection,
    payload: &SeriesPayload,
) -> Result<Upserted, sqlx::Error> {
    let allowed = serde_json::to_string(&payload.allowed_class_ids)
        .unwrap_or_else(|_| "[]".to_string());

    let candidate = Uuid::new_v4();
    let guid: String = sqlx::query_scalar(
        r#"
        INSERT INTO series
            (guid, external_id, name, license_tier, multiclass,
             allowed_class_ids, active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        ON CONFLICT(external_id) DO UPDATE SET
            name = excluded.name,
            license_tier = excluded.license_tier,
            multiclass = excluded.multiclass,
            allowed_class_ids = excluded.allowed_class_ids,
            active = excluded.active,
            updated_at = CURRENT_TIMESTAMP
        RETURNING guid
        "#,
    )
    .bind(candidate.to_string())
    .bind(payload.external_id)
    .bind(&payload.name)
    .bind(&payload.license_tier)
    .bind(payload.multiclass)
    .bind(&allowed)
    .bind(payload.active)
    .fetch_one(&mut *conn)
    .await?;

    let guid = parse_guid(&guid)?;
    Ok(Upserted { guid, created: guid == candidate })
}

/// Load a series by its upstream identifier
pub async fn load_series_by_external_id(
    pool: &SqlitePool,
    external_id: i64,
) -> Result<Option<Series>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT guid, external_id, name, license_tier, multiclass,
               allowed_class_ids, active
        FROM series
        WHERE external_id = ?
        "#,
    )
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let guid: String = row.get("guid");
            let allowed: String = row.get("allowed_class_ids");

            Ok(Some(Series {
                guid: parse_guid(&guid)?,
                external_id: row.get("external_id"),
                name: row.get("name"),
                license_tier: row.get("license_tier"),
                multiclass: row.get("multiclass"),
                allowed_class_ids: serde_json::from_str(&allowed).unwrap_or_default(),
                active: row.get("active"),
            }))
        }
        None => Ok(None),
    }
}

/// All known series external ids, for past-season enumeration
pub async fn list_series_external_ids(pool: &SqlitePool) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT external_id FROM series ORDER BY external_id")
        .fetch_all(pool)
        .await
}

/// Number of series rows (test and diagnostics helper)
pub async fn count_series(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM series").fetch_one(pool).await
}
