//! Configuration loading and data folder resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Data folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. `PADDOCK_DATA` environment variable
/// 3. `data_dir` key in the platform config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_data_dir(cli_arg: Option<&str>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var("PADDOCK_DATA") {
        return PathBuf::from(path);
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = platform_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(data_dir) = config.get("data_dir").and_then(|v| v.as_str()) {
                    return PathBuf::from(data_dir);
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    default_data_dir()
}

/// Platform configuration file path (`~/.config/paddock/config.toml` or
/// `/etc/paddock/config.toml` on Linux)
fn platform_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("paddock").join("config.toml"));

    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/paddock/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// OS-dependent default data folder
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("paddock"))
        .unwrap_or_else(|| PathBuf::from("./paddock_data"))
}

/// Service settings loaded from `<data_dir>/paddock-sync.toml`
///
/// Every field has a compiled default so a missing or partial file still
/// yields a runnable configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub upstream: UpstreamSettings,
    pub cache: CacheSettings,
    pub orchestrator: OrchestratorSettings,
}

/// Upstream racing-data provider settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    /// Base URL of the provider API
    pub base_url: String,
    /// Minimum spacing between outbound requests, shared across all workers
    pub min_request_interval_ms: u64,
    /// Per-request timeout
    pub request_timeout_secs: u64,
    /// Client-level retry attempts for transient failures (1 = no retry)
    pub retry_max_attempts: u32,
    /// Base delay before the first client-level retry
    pub retry_initial_delay_ms: u64,
    /// Cap on client-level backoff growth
    pub retry_max_delay_ms: u64,
}

/// Cache gateway settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub max_entries: u64,
    /// TTL for the all-series listing
    pub series_ttl_secs: u64,
    /// TTL for the current/future seasons payload
    pub seasons_ttl_secs: u64,
    /// TTL for per-season full schedules (historical data drifts slowly)
    pub schedule_ttl_secs: u64,
}

/// Sync orchestrator settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Parallel sync workers consuming the task queue
    pub workers: usize,
    /// Task-level retry attempts for transient upstream failures
    pub retry_max_attempts: u32,
    /// Task-level retry delay step
    pub retry_delay_ms: u64,
    /// `linear` or `exponential`
    pub retry_backoff: String,
    /// Cadence of the series-metadata sync trigger
    pub series_metadata_interval_secs: u64,
    /// Cadence of the current-seasons sync trigger
    pub current_seasons_interval_secs: u64,
    /// Past-seasons sync is opt-in: it can enqueue a large number of
    /// per-season sub-tasks
    pub past_seasons_enabled: bool,
    /// Cadence of the past-seasons sync trigger when enabled
    pub past_seasons_interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            upstream: UpstreamSettings::default(),
            cache: CacheSettings::default(),
            orchestrator: OrchestratorSettings::default(),
        }
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.raceprovider.example/data".to_string(),
            min_request_interval_ms: 1000,
            request_timeout_secs: 30,
            retry_max_attempts: 3,
            retry_initial_delay_ms: 500,
            retry_max_delay_ms: 30_000,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            series_ttl_secs: 6 * 3600,
            seasons_ttl_secs: 3600,
            schedule_ttl_secs: 24 * 3600,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            retry_max_attempts: 3,
            retry_delay_ms: 2_000,
            retry_backoff: "exponential".to_string(),
            series_metadata_interval_secs: 6 * 3600,
            current_seasons_interval_secs: 3600,
            past_seasons_enabled: false,
            past_seasons_interval_secs: 7 * 24 * 3600,
        }
    }
}

impl SyncSettings {
    /// Load settings from a TOML file, falling back to defaults when the
    /// file does not exist. A file that exists but fails to parse is a
    /// configuration error, not a silent fallback.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }
}
