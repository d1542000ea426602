//! Upstream API client with shared rate gate and bounded retry
//!
//! All four read operations go through the cache gateway; the rate gate is
//! process-wide shared state, so total outbound request rate stays bounded
//! regardless of how many sync workers are running.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;

use super::payload::{self, PastSeasonRef, SeasonSchedulePayload, SeriesPayload};
use super::UpstreamError;
use crate::cache::{keys, CacheGateway};
use paddock_common::config::{CacheSettings, UpstreamSettings};

/// Minimum-interval gate shared by every worker in the process
///
/// `acquire()` blocks until the configured spacing from the previous
/// outbound request has elapsed, then claims the slot.
pub struct RateGate {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    /// Wait if necessary to comply with the request spacing
    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Rate gate: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// Configuration for client-level retry on transient errors
///
/// Exponential backoff: `initial_delay * 2^attempt`, capped at `max_delay`.
/// A `retry_after` hint from a rate-limit response takes precedence.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts including the initial request; 1 = no retry
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }

    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or_else(|| self.delay_for_attempt(attempt))
    }
}

/// Execute an operation with retry on transient errors
///
/// Permanent errors are returned immediately without retry.
async fn with_retry<F, Fut, T>(config: &RetryConfig, endpoint: &str, f: F) -> Result<T, UpstreamError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, UpstreamError>>,
{
    let mut last_err = None;
    for attempt in 0..config.max_attempts {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() => {
                if attempt + 1 < config.max_attempts {
                    let delay = config.effective_delay(attempt, e.retry_after());
                    tracing::warn!(
                        endpoint,
                        attempt = attempt + 1,
                        max_attempts = config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient upstream error"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| UpstreamError::Network("retry loop exhausted".to_string())))
}

/// Per-endpoint cache TTLs
#[derive(Debug, Clone)]
pub struct CacheTtls {
    pub series: Duration,
    pub seasons: Duration,
    pub schedule: Duration,
}

impl From<&CacheSettings> for CacheTtls {
    fn from(s: &CacheSettings) -> Self {
        Self {
            series: Duration::from_secs(s.series_ttl_secs),
            seasons: Duration::from_secs(s.seasons_ttl_secs),
            schedule: Duration::from_secs(s.schedule_ttl_secs),
        }
    }
}

/// Typed accessors for the provider's schedule endpoints
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    gate: Arc<RateGate>,
    cache: CacheGateway,
    retry: RetryConfig,
    ttls: CacheTtls,
}

impl UpstreamClient {
    pub fn new(
        base_url: impl Into<String>,
        gate: Arc<RateGate>,
        cache: CacheGateway,
        retry: RetryConfig,
        ttls: CacheTtls,
        request_timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("paddock-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            gate,
            cache,
            retry,
            ttls,
        })
    }

    /// Build a client from settings, sharing the given rate gate
    pub fn from_settings(
        upstream: &UpstreamSettings,
        cache_settings: &CacheSettings,
        gate: Arc<RateGate>,
    ) -> Result<Self, UpstreamError> {
        Self::new(
            upstream.base_url.clone(),
            gate,
            CacheGateway::new(cache_settings.max_entries),
            RetryConfig {
                max_attempts: upstream.retry_max_attempts,
                initial_delay: Duration::from_millis(upstream.retry_initial_delay_ms),
                max_delay: Duration::from_millis(upstream.retry_max_delay_ms),
            },
            CacheTtls::from(cache_settings),
            Duration::from_secs(upstream.request_timeout_secs),
        )
    }

    /// List all series the provider currently publishes
    pub async fn list_series(&self, force_refresh: bool) -> Result<Vec<SeriesPayload>, UpstreamError> {
        let path = "/series";
        let key = keys::series_list();
        let raw = self
            .cache
            .get_or_fetch(&key, self.ttls.series, force_refresh, || self.fetch_json(path))
            .await?;
        self.checked(&key, payload::validate_series_list(&raw, path)).await
    }

    /// Current and future seasons with embedded schedules, all series at once
    pub async fn current_seasons(&self, force_refresh: bool) -> Result<Vec<SeasonSchedulePayload>, UpstreamError> {
        let path = "/seasons/current";
        let key = keys::current_seasons();
        let raw = self
            .cache
            .get_or_fetch(&key, self.ttls.seasons, force_refresh, || self.fetch_json(path))
            .await?;
        self.checked(&key, payload::validate_season_list(&raw, path)).await
    }

    /// Past seasons for one series (identifiers only)
    pub async fn past_seasons(
        &self,
        series_external_id: i64,
        force_refresh: bool,
    ) -> Result<Vec<PastSeasonRef>, UpstreamError> {
        let path = format!("/series/{series_external_id}/past-seasons");
        let key = keys::past_seasons(series_external_id);
        let raw = self
            .cache
            .get_or_fetch(&key, self.ttls.schedule, force_refresh, || {
                self.fetch_json(&path)
            })
            .await?;
        self.checked(&key, payload::validate_past_seasons(&raw, &path)).await
    }

    /// Full schedule for one (typically past) season
    pub async fn season_schedule(
        &self,
        season_external_id: i64,
        force_refresh: bool,
    ) -> Result<SeasonSchedulePayload, UpstreamError> {
        let path = format!("/seasons/{season_external_id}/schedule");
        let key = keys::season_schedule(season_external_id);
        let raw = self
            .cache
            .get_or_fetch(&key, self.ttls.schedule, force_refresh, || {
                self.fetch_json(&path)
            })
            .await?;
        self.checked(&key, payload::validate_season_schedule(&raw, &path)).await
    }

    /// Evict a cached body that failed shape validation
    ///
    /// Otherwise a malformed response would be replayed from the cache on
    /// every call until its TTL expires; evicting it makes the next call
    /// refetch.
    async fn checked<T>(
        &self,
        key: &str,
        result: Result<T, UpstreamError>,
    ) -> Result<T, UpstreamError> {
        if matches!(result, Err(UpstreamError::Shape { .. })) {
            tracing::warn!(key, "Evicting cached payload that failed validation");
            self.cache.invalidate(key).await;
        }
        result
    }

    /// Rate-gated, retried GET returning the raw JSON body
    async fn fetch_json(&self, path: &str) -> Result<Value, UpstreamError> {
        let url = format!("{}{}", self.base_url, path);
        with_retry(&self.retry, path, || async {
            self.gate.acquire().await;

            tracing::debug!(url = %url, "Querying upstream API");
            let response = self.http.get(&url).send().await.map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout
                } else {
                    UpstreamError::Network(e.to_string())
                }
            })?;

            let status = response.status();
            if status.as_u16() == 429 {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                return Err(UpstreamError::RateLimited { retry_after });
            }
            if status.is_server_error() {
                return Err(UpstreamError::Server(status.as_u16()));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(UpstreamError::Api { status: status.as_u16(), body });
            }

            let body = response
                .text()
                .await
                .map_err(|e| UpstreamError::Network(e.to_string()))?;
            serde_json::from_str(&body).map_err(|e| UpstreamError::Shape {
                endpoint: path.to_string(),
                detail: format!("response is not valid JSON: {e}"),
                raw: body,
            })
        })
        .await
    }
}
