//! Cache gateway in front of all upstream API calls
//!
//! Pure memoization boundary: get-or-fetch keyed by endpoint+parameters,
//! per-entry TTL, forced-refresh override. No network or persistence logic
//! lives here, so the rest of the pipeline is testable with a closure
//! standing in for the provider.
//!
//! Concurrent writers to the same key simply race to the same TTL-bounded
//! value; staleness is acceptable by design and never used for
//! correctness-critical reads.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

/// Cached payload plus the TTL it was stored with
#[derive(Clone)]
struct CachedPayload {
    body: Arc<Value>,
    ttl: Duration,
}

/// Per-entry expiry: each payload carries its own TTL
struct PerEntryTtl;

impl moka::Expiry<String, CachedPayload> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedPayload,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Get-or-fetch cache over raw upstream JSON payloads
///
/// Keys are a deterministic encoding of endpoint name plus parameters,
/// built by the [`keys`] helpers.
pub struct CacheGateway {
    entries: moka::future::Cache<String, CachedPayload>,
}

impl CacheGateway {
    pub fn new(max_entries: u64) -> Self {
        Self {
            entries: moka::future::Cache::builder()
                .max_capacity(max_entries)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }

    /// On cache hit (and not `force_refresh`) returns the cached payload
    /// without invoking `producer`; on miss or forced refresh invokes
    /// `producer`, stores its result with `ttl`, and returns it.
    ///
    /// A producer failure is returned as-is and nothing is cached.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        force_refresh: bool,
        producer: F,
    ) -> Result<Arc<Value>, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value, E>>,
    {
        if !force_refresh {
            if let Some(hit) = self.entries.get(key).await {
                tracing::debug!(key, "Cache hit");
                return Ok(hit.body);
            }
        }

        tracing::debug!(key, force_refresh, "Cache miss, invoking producer");
        let body = Arc::new(producer().await?);
        self.entries
            .insert(key.to_string(), CachedPayload { body: body.clone(), ttl })
            .await;
        Ok(body)
    }

    /// Drop one entry
    pub async fn invalidate(&self, key: &str) {
        self.entries.invalidate(key).await;
    }

    /// Entries currently cached (approximate, for diagnostics)
    pub fn len(&self) -> u64 {
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Deterministic cache key builders, one per upstream endpoint
pub mod keys {
    pub fn series_list() -> String {
        "series".to_string()
    }

    pub fn current_seasons() -> String {
        "seasons:current".to_string()
    }

    pub fn past_seasons(series_external_id: i64) -> String {
        format!("series:{series_external_id}:past-seasons")
    }

    pub fn season_schedule(season_external_id: i64) -> String {
        format!("season:{season_external_id}:schedule")
    }
}
