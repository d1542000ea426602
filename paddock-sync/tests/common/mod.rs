#![allow(dead_code)]

//! Shared fixtures for the integration suites

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use paddock_common::db::init::create_all_tables;
use paddock_sync::db;
use paddock_sync::model::ScheduleDescriptor;
use paddock_sync::upstream::{RestrictionPayload, RoundPayload, SeasonSchedulePayload, SeriesPayload};

/// Single-connection in-memory pool with the full schema
///
/// One connection only: every handle must see the same in-memory database.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .unwrap();
    create_all_tables(&pool).await.unwrap();
    pool
}

/// Seed the track layout reference table with the codes the fixtures use
pub async fn seed_layouts(pool: &SqlitePool) {
    db::refdata::insert_layout(pool, "spa-grand-prix", "Spa-Francorchamps", Some("Grand Prix"))
        .await
        .unwrap();
    db::refdata::insert_layout(pool, "monza-gp", "Monza", Some("Grand Prix"))
        .await
        .unwrap();
    db::refdata::insert_layout(pool, "lemans-full", "Circuit de la Sarthe", None)
        .await
        .unwrap();
}

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

pub fn gt3_series() -> SeriesPayload {
    SeriesPayload {
        external_id: 280,
        name: "GT3 Challenge".to_string(),
        license_tier: Some("C".to_string()),
        multiclass: false,
        allowed_class_ids: vec![2523],
        active: true,
    }
}

pub fn prototype_series() -> SeriesPayload {
    SeriesPayload {
        external_id: 311,
        name: "Prototype Cup".to_string(),
        license_tier: Some("B".to_string()),
        multiclass: true,
        allowed_class_ids: vec![2523, 3104],
        active: true,
    }
}

pub fn pattern_round(round_number: i64, layout_code: &str) -> RoundPayload {
    RoundPayload {
        round_number,
        layout_code: layout_code.to_string(),
        weather: Some(serde_json::json!({"type": "dynamic"})),
        schedule: ScheduleDescriptor::Pattern {
            first_session_offset_min: 45,
            repeat_interval_min: 120,
            session_count: None,
        },
        car_class_ids: vec![2523],
        restrictions: vec![RestrictionPayload {
            car_id: 133,
            max_pct_fuel_fill: Some(55.0),
            max_dry_tire_sets: None,
            power_adjust_pct: None,
            weight_penalty_kg: Some(15.0),
            fixed_setup: None,
        }],
    }
}

pub fn fixed_round(round_number: i64, layout_code: &str, times: Vec<DateTime<Utc>>) -> RoundPayload {
    RoundPayload {
        round_number,
        layout_code: layout_code.to_string(),
        weather: None,
        schedule: ScheduleDescriptor::FixedTimes(times),
        car_class_ids: vec![2523],
        restrictions: vec![],
    }
}

pub fn prototype_season(rounds: Vec<RoundPayload>) -> SeasonSchedulePayload {
    SeasonSchedulePayload {
        external_id: 4520,
        series_external_id: 311,
        name: "Prototype Cup - 2026 Season 3".to_string(),
        active: true,
        starts_on: utc(2026, 6, 16, 0, 0),
        ends_on: utc(2026, 9, 8, 0, 0),
        rounds,
    }
}

pub fn gt3_season(rounds: Vec<RoundPayload>) -> SeasonSchedulePayload {
    SeasonSchedulePayload {
        external_id: 4501,
        series_external_id: 280,
        name: "GT3 Challenge - 2026 Season 3".to_string(),
        active: true,
        starts_on: utc(2026, 6, 16, 0, 0),
        ends_on: utc(2026, 9, 8, 0, 0),
        rounds,
    }
}
