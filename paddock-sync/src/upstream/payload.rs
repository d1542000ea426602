//! Upstream payload shapes and validation
//!
//! The provider's JSON varies by endpoint; raw `Api*` structs mirror the
//! wire shape, and `validate_*` functions turn them into normalized
//! payloads with parsed timestamps and a tagged schedule descriptor. A
//! payload that fails validation is a permanent failure for that unit of
//! work, reported with the raw body attached.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::UpstreamError;
use crate::model::ScheduleDescriptor;

/// Normalized series entry from the series listing
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPayload {
    pub external_id: i64,
    pub name: String,
    pub license_tier: Option<String>,
    pub multiclass: bool,
    pub allowed_class_ids: Vec<i64>,
    pub active: bool,
}

/// Normalized season with its full round list
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonSchedulePayload {
    pub external_id: i64,
    pub series_external_id: i64,
    pub name: String,
    pub active: bool,
    pub starts_on: DateTime<Utc>,
    pub ends_on: DateTime<Utc>,
    pub rounds: Vec<RoundPayload>,
}

/// Normalized round entry
#[derive(Debug, Clone, PartialEq)]
pub struct RoundPayload {
    pub round_number: i64,
    pub layout_code: String,
    pub weather: Option<Value>,
    pub schedule: ScheduleDescriptor,
    pub car_class_ids: Vec<i64>,
    pub restrictions: Vec<RestrictionPayload>,
}

/// Normalized balance-of-performance entry
#[derive(Debug, Clone, PartialEq)]
pub struct RestrictionPayload {
    pub car_id: i64,
    pub max_pct_fuel_fill: Option<f64>,
    pub max_dry_tire_sets: Option<i64>,
    pub power_adjust_pct: Option<f64>,
    pub weight_penalty_kg: Option<f64>,
    pub fixed_setup: Option<String>,
}

/// Reference to a past season, used to enumerate per-season child tasks
#[derive(Debug, Clone, PartialEq)]
pub struct PastSeasonRef {
    pub external_id: i64,
    pub series_external_id: i64,
    pub name: String,
}

// Wire shapes ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiSeries {
    series_id: i64,
    series_name: String,
    license_group: Option<String>,
    #[serde(default)]
    multiclass: bool,
    #[serde(default)]
    car_class_ids: Vec<i64>,
    active: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ApiSeason {
    season_id: i64,
    series_id: i64,
    season_name: String,
    active: Option<bool>,
    start_date: String,
    end_date: String,
    #[serde(default)]
    schedules: Vec<ApiRaceWeek>,
}

#[derive(Debug, Deserialize)]
struct ApiRaceWeek {
    race_week_num: i64,
    layout_code: String,
    weather: Option<Value>,
    race_time_descriptors: Vec<ApiTimeDescriptor>,
    #[serde(default)]
    car_class_ids: Vec<i64>,
    #[serde(default)]
    car_restrictions: Vec<ApiCarRestriction>,
}

#[derive(Debug, Deserialize)]
struct ApiTimeDescriptor {
    repeating: bool,
    first_session_offset_minutes: Option<i64>,
    repeat_minutes: Option<i64>,
    session_count: Option<i64>,
    session_times: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ApiCarRestriction {
    car_id: i64,
    max_pct_fuel_fill: Option<f64>,
    max_dry_tire_sets: Option<i64>,
    power_adjust_pct: Option<f64>,
    weight_penalty_kg: Option<f64>,
    fixed_setup: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiPastSeason {
    season_id: i64,
    series_id: i64,
    season_name: String,
}

// Validation ----------------------------------------------------------------

fn shape_error(endpoint: &str, detail: impl Into<String>, raw: &Value) -> UpstreamError {
    UpstreamError::Shape {
        endpoint: endpoint.to_string(),
        detail: detail.into(),
        raw: raw.to_string(),
    }
}

fn parse_timestamp(s: &str, field: &str, endpoint: &str, raw: &Value) -> Result<DateTime<Utc>, UpstreamError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| shape_error(endpoint, format!("invalid {field} '{s}': {e}"), raw))
}

/// Validate the all-series listing
pub fn validate_series_list(raw: &Value, endpoint: &str) -> Result<Vec<SeriesPayload>, UpstreamError> {
    let entries: Vec<ApiSeries> = serde_json::from_value(raw.clone())
        .map_err(|e| shape_error(endpoint, e.to_string(), raw))?;

    Ok(entries
        .into_iter()
        .map(|s| SeriesPayload {
            external_id: s.series_id,
            name: s.series_name,
            license_tier: s.license_group,
            multiclass: s.multiclass,
            allowed_class_ids: s.car_class_ids,
            active: s.active.unwrap_or(true),
        })
        .collect())
}

/// Validate the current/future seasons payload (all series at once)
pub fn validate_season_list(raw: &Value, endpoint: &str) -> Result<Vec<SeasonSchedulePayload>, UpstreamError> {
    let entries: Vec<ApiSeason> = serde_json::from_value(raw.clone())
        .map_err(|e| shape_error(endpoint, e.to_string(), raw))?;

    entries
        .into_iter()
        .map(|s| normalize_season(s, endpoint, raw))
        .collect()
}

/// Validate a single full-season schedule payload
pub fn validate_season_schedule(raw: &Value, endpoint: &str) -> Result<SeasonSchedulePayload, UpstreamError> {
    let season: ApiSeason = serde_json::from_value(raw.clone())
        .map_err(|e| shape_error(endpoint, e.to_string(), raw))?;
    normalize_season(season, endpoint, raw)
}

/// Validate the past-season listing for one series
pub fn validate_past_seasons(raw: &Value, endpoint: &str) -> Result<Vec<PastSeasonRef>, UpstreamError> {
    let entries: Vec<ApiPastSeason> = serde_json::from_value(raw.clone())
        .map_err(|e| shape_error(endpoint, e.to_string(), raw))?;

    Ok(entries
        .into_iter()
        .map(|s| PastSeasonRef {
            external_id: s.season_id,
            series_external_id: s.series_id,
            name: s.season_name,
        })
        .collect())
}

fn normalize_season(season: ApiSeason, endpoint: &str, raw: &Value) -> Result<SeasonSchedulePayload, UpstreamError> {
    let starts_on = parse_timestamp(&season.start_date, "start_date", endpoint, raw)?;
    let ends_on = parse_timestamp(&season.end_date, "end_date", endpoint, raw)?;
    if ends_on < starts_on {
        return Err(shape_error(
            endpoint,
            format!("season {} ends before it starts", season.season_id),
            raw,
        ));
    }

    let rounds = season
        .schedules
        .into_iter()
        .map(|week| normalize_round(week, endpoint, raw))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SeasonSchedulePayload {
        external_id: season.season_id,
        series_external_id: season.series_id,
        name: season.season_name,
        active: season.active.unwrap_or(true),
        starts_on,
        ends_on,
        rounds,
    })
}

fn normalize_round(week: ApiRaceWeek, endpoint: &str, raw: &Value) -> Result<RoundPayload, UpstreamError> {
    if week.race_week_num < 0 {
        return Err(shape_error(endpoint, format!("negative race_week_num {}", week.race_week_num), raw));
    }
    if week.layout_code.is_empty() {
        return Err(shape_error(endpoint, format!("round {} has empty layout_code", week.race_week_num), raw));
    }

    // Exactly one descriptor per round; upstream occasionally converts a
    // pattern into fixed times between syncs, but never ships both at once.
    let descriptor = match week.race_time_descriptors.as_slice() {
        [d] => normalize_descriptor(d, week.race_week_num, endpoint, raw)?,
        [] => {
            return Err(shape_error(endpoint, format!("round {} has no race_time_descriptors", week.race_week_num), raw));
        }
        more => {
            return Err(shape_error(
                endpoint,
                format!("round {} has {} race_time_descriptors, expected 1", week.race_week_num, more.len()),
                raw,
            ));
        }
    };

    Ok(RoundPayload {
        round_number: week.race_week_num,
        layout_code: week.layout_code,
        weather: week.weather,
        schedule: descriptor,
        car_class_ids: week.car_class_ids,
        restrictions: week
            .car_restrictions
            .into_iter()
            .map(|r| RestrictionPayload {
                car_id: r.car_id,
                max_pct_fuel_fill: r.max_pct_fuel_fill,
                max_dry_tire_sets: r.max_dry_tire_sets,
                power_adjust_pct: r.power_adjust_pct,
                weight_penalty_kg: r.weight_penalty_kg,
                fixed_setup: r.fixed_setup,
            })
            .collect(),
    })
}

fn normalize_descriptor(
    d: &ApiTimeDescriptor,
    round: i64,
    endpoint: &str,
    raw: &Value,
) -> Result<ScheduleDescriptor, UpstreamError> {
    if d.repeating {
        if d.session_times.is_some() {
            return Err(shape_error(endpoint, format!("round {round}: repeating descriptor carries session_times"), raw));
        }
        let offset = d.first_session_offset_minutes.ok_or_else(|| {
            shape_error(endpoint, format!("round {round}: repeating descriptor missing first_session_offset_minutes"), raw)
        })?;
        let interval = d.repeat_minutes.ok_or_else(|| {
            shape_error(endpoint, format!("round {round}: repeating descriptor missing repeat_minutes"), raw)
        })?;
        Ok(ScheduleDescriptor::Pattern {
            first_session_offset_min: offset,
            repeat_interval_min: interval,
            session_count: d.session_count,
        })
    } else {
        let times = d
            .session_times
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                shape_error(endpoint, format!("round {round}: fixed descriptor has no session_times"), raw)
            })?;
        let parsed = times
            .iter()
            .map(|t| parse_timestamp(t, "session_times entry", endpoint, raw))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ScheduleDescriptor::FixedTimes(parsed))
    }
}
