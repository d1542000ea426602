//! Event class and car restriction persistence
//!
//! Rows present in the DB but absent from an incoming payload are left
//! untouched: upstream does not distinguish "removed" from "not mentioned
//! this sync".

use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{parse_guid, Upserted};
use crate::model::{CarRestriction, EventClass};
use crate::upstream::RestrictionPayload;

/// Upsert a permitted car class for an event, keyed `(event, car_class)`
pub async fn upsert_event_class(
    conn: &mut SqliteConnection,
    event_guid: Uuid,
    car_class_id: i64,
    display_order: i64,
) -> Result<Upserted, sqlx::Error> {
    let candidate = Uuid::new_v4();
    let guid: String = sqlx::query_scalar(
        r#"
        INSERT INTO event_classes (guid, event_id, car_class_id, display_order)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(event_id, car_class_id) DO UPDATE SET
            display_order = excluded.display_order
        RETURNING guid
        "#,
    )
    .bind(candidate.to_string())
    .bind(event_guid.to_string())
    .bind(car_class_id)
    .bind(display_order)
    .fetch_one(&mut *conn)
    .await?;

    let guid = parse_guid(&guid)?;
    Ok(Upserted { guid, created: guid == candidate })
}

/// Upsert a balance-of-performance adjustment, keyed `(event, car)`
pub async fn upsert_car_restriction(
    conn: &mut SqliteConnection,
    event_guid: Uuid,
    payload: &RestrictionPayload,
) -> Result<Upserted, sqlx::Error> {
    let candidate = Uuid::new_v4();
    let guid: String = sqlx::query_scalar(
        r#"
        INSERT INTO car_restrictions
            (guid, event_id, car_id, max_pct_fuel_fill, max_dry_tire_sets,
             power_adjust_pct, weight_penalty_kg, fixed_setup)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(event_id, car_id) DO UPDATE SET
            max_pct_fuel_fill = excluded.max_pct_fuel_fill,
            max_dry_tire_sets = excluded.max_dry_tire_sets,
            power_adjust_pct = excluded.power_adjust_pct,
            weight_penalty_kg = excluded.weight_penalty_kg,
            fixed_setup = excluded.fixed_setup
        RETURNING guid
        "#,
    )
    .bind(candidate.to_string())
    .bind(event_guid.to_string())
    .bind(payload.car_id)
    .bind(payload.max_pct_fuel_fill)
    .bind(payload.max_dry_tire_sets)
    .bind(payload.power_adjust_pct)
    .bind(payload.weight_penalty_kg)
    .bind(&payload.fixed_setup)
    .fetch_one(&mut *conn)
    .await?;

    let guid = parse_guid(&guid)?;
    Ok(Upserted { guid, created: guid == candidate })
}

/// Car classes permitted for an event, in display order
pub async fn load_event_classes(
    pool: &SqlitePool,
    event_guid: Uuid,
) -> Result<Vec<EventClass>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT guid, event_id, car_class_id, display_order
        FROM event_classes
        WHERE event_id = ?
        ORDER BY display_order
        "#,
    )
    .bind(event_guid.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let guid: String = row.get("guid");
            let event_id: String = row.get("event_id");
            Ok(EventClass {
                guid: parse_guid(&guid)?,
                event_id: parse_guid(&event_id)?,
                car_class_id: row.get("car_class_id"),
                display_order: row.get("display_order"),
            })
        })
        .collect()
}

/// Balance-of-performance rows for an event
pub async fn load_car_restrictions(
    pool: &SqlitePool,
    event_guid: Uuid,
) -> Result<Vec<CarRestriction>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT guid, event_id, car_id, max_pct_fuel_fill, max_dry_tire_sets,
               power_adjust_pct, weight_penalty_kg, fixed_setup
        FROM car_restrictions
        WHERE event_id = ?
        ORDER BY car_id
        "#,
    )
    .bind(event_guid.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let guid: String = row.get("guid");
            let event_id: String = row.get("event_id");
            Ok(CarRestriction {
                guid: parse_guid(&guid)?,
                event_id: parse_guid(&event_id)?,
                car_id: row.get("car_id"),
                max_pct_fuel_fill: row.get("max_pct_fuel_fill"),
                max_dry_tire_sets: row.get("max_dry_tire_sets"),
                power_adjust_pct: row.get("power_adjust_pct"),
                weight_penalty_kg: row.get("weight_penalty_kg"),
                fixed_setup: row.get("fixed_setup"),
            })
        })
        .collect()
}
