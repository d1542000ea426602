//! Upstream racing-data provider integration
//!
//! [`client::UpstreamClient`] exposes the four read operations the sync
//! pipeline needs, behind the cache gateway and a process-wide rate gate.
//! [`payload`] validates every response against an expected shape and
//! produces strongly-typed normalized structures before anything reaches
//! the reconciler; duck-typed JSON never crosses that boundary.

pub mod client;
pub mod payload;

pub use client::{RateGate, RetryConfig, UpstreamClient};
pub use payload::{PastSeasonRef, RestrictionPayload, RoundPayload, SeasonSchedulePayload, SeriesPayload};

use std::time::Duration;
use thiserror::Error;

/// Upstream client errors
///
/// Transient errors (timeout, connection failure, 5xx, 429) are retried
/// with backoff; everything else is permanent and surfaced immediately.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Upstream server error {0}")]
    Server(u16),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Payload failed shape validation. Carries the raw body for diagnosis;
    /// validation runs before any DB write begins, so a bad payload never
    /// corrupts partially-applied state.
    #[error("Unexpected payload shape from {endpoint}: {detail}")]
    Shape {
        endpoint: String,
        detail: String,
        raw: String,
    },
}

impl UpstreamError {
    /// Whether the orchestrator/client may retry this failure
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpstreamError::Network(_)
                | UpstreamError::Timeout
                | UpstreamError::RateLimited { .. }
                | UpstreamError::Server(_)
        )
    }

    /// Upstream-provided retry hint, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            UpstreamError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
