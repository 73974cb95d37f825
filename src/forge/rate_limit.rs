//! Upstream API rate-limit tracking.
//!
//! Reads `X-RateLimit-Remaining` / `X-RateLimit-Reset` (or the standardised
//! `RateLimit-Remaining` / `RateLimit-Reset`) from forge API responses.  The
//! proxy never throttles or retries; the values are exported as a metric and
//! a warning is logged when the remaining budget runs low.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

/// Remaining-call count below which every update logs a warning.
pub const LOW_REMAINING_THRESHOLD: u64 = 100;

/// Shared rate-limit state updated after every forge API response.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    /// Remaining API calls before the rate limit resets.
    remaining: Arc<AtomicU64>,
    /// Unix timestamp at which the rate limit window resets.
    reset_at: Arc<AtomicU64>,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitState {
    pub fn new() -> Self {
        Self {
            remaining: Arc::new(AtomicU64::new(u64::MAX)),
            reset_at: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current remaining calls; `u64::MAX` until a response reported it.
    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Relaxed)
    }

    /// Unix timestamp when the window resets.
    pub fn reset_at(&self) -> u64 {
        self.reset_at.load(Ordering::Relaxed)
    }

    /// Whether any response has reported a remaining count yet.
    pub fn is_known(&self) -> bool {
        self.remaining() != u64::MAX
    }

    /// Update state from HTTP response headers.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let remaining = header_u64(headers, "X-RateLimit-Remaining", "RateLimit-Remaining");
        let reset = header_u64(headers, "X-RateLimit-Reset", "RateLimit-Reset");

        if let Some(r) = reset {
            self.reset_at.store(r, Ordering::Relaxed);
        }
        if let Some(r) = remaining {
            self.remaining.store(r, Ordering::Relaxed);
            if r < LOW_REMAINING_THRESHOLD {
                warn!(
                    remaining = r,
                    reset_at = self.reset_at(),
                    "upstream API rate limit nearly exhausted"
                );
            }
        }
    }
}

fn header_u64(headers: &reqwest::header::HeaderMap, primary: &str, fallback: &str) -> Option<u64> {
    headers
        .get(primary)
        .or_else(|| headers.get(fallback))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}
