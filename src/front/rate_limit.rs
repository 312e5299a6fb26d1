//! Rate-limit signals read from Front API responses.
//!
//! See <https://dev.frontapp.com/docs/rate-limiting>. Front answers 429 both
//! for a short per-resource burst limit (requests remain in the global
//! budget) and for global quota exhaustion (`x-ratelimit-remaining: 0`).
//! Either way `retry-after` says how long to wait before re-issuing the same
//! request.

use std::time::Duration;

use reqwest::header::HeaderMap;

pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RETRY_AFTER_HEADER: &str = "retry-after";
pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const TIER_HEADER: &str = "x-front-tier";

/// Snapshot of the rate-limit headers of a single response. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitState {
    pub remaining: u64,
    pub retry_after_secs: u64,
    pub limit: u64,
    pub tier: u64,
}

/// Which limit a 429 response ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitKind {
    /// Requests remain globally; a per-resource burst tier was exceeded.
    Burst { tier: u64 },
    /// The global request budget is exhausted.
    Global { limit: u64 },
}

impl RateLimitState {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            remaining: header_u64(headers, REMAINING_HEADER),
            retry_after_secs: header_u64(headers, RETRY_AFTER_HEADER),
            limit: header_u64(headers, LIMIT_HEADER),
            tier: header_u64(headers, TIER_HEADER),
        }
    }

    pub fn kind(&self) -> RateLimitKind {
        if self.remaining > 0 {
            RateLimitKind::Burst { tier: self.tier }
        } else {
            RateLimitKind::Global { limit: self.limit }
        }
    }

    /// The wait requested by the server, or `None` when there is no usable
    /// `retry-after` signal.
    pub fn retry_after(&self) -> Option<Duration> {
        (self.retry_after_secs > 0).then(|| Duration::from_secs(self.retry_after_secs))
    }
}

/// Parse an integer header. Missing or malformed values read as 0.
fn header_u64(headers: &HeaderMap, name: &str) -> u64 {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

/// Suspends the export while a rate limit is waited out.
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real-time sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeper that returns immediately and remembers every requested wait.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    waits: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl RecordingSleeper {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.waits.lock().unwrap().push(duration);
    }
}
