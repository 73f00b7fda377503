//! Per-principal sliding-window rate limiter.
//!
//! State per key is an ordered list of request timestamps within the
//! window; a request is allowed when fewer than `max_requests` timestamps
//! remain after evicting everything older than `now - window`.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded for key `{key}` — retry after {retry_after_secs}s")]
    Exceeded {
        key: String,
        retry_after_secs: u64,
        limit: u32,
        reset_unix: u64,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            window,
            max_requests,
        }
    }
}

/// Headers/response fields for a request that was allowed.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitOutcome {
    pub limit: u32,
    pub remaining: u32,
    pub reset_unix: u64,
}

struct Bucket {
    timestamps: VecDeque<u64>,
}

/// Sliding-window limiter keyed by an arbitrary string — the middleware
/// layer derives the key (`"bearer:" + token`, or `"__anonymous__"`).
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    /// Check `key` against the window, using the current wall-clock time.
    pub fn check(&self, key: &str) -> Result<RateLimitOutcome, RateLimitError> {
        self.check_at(key, now_unix_ms())
    }

    /// Check `key` as of `now_ms` (milliseconds since the Unix epoch).
    /// Exposed directly so tests can drive the sliding window under fake
    /// time without sleeping.
    pub fn check_at(&self, key: &str, now_ms: u64) -> Result<RateLimitOutcome, RateLimitError> {
        let window_ms = self.config.window.as_millis() as u64;
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket {
                timestamps: VecDeque::new(),
            });

        let cutoff = now_ms.saturating_sub(window_ms);
        while matches!(bucket.timestamps.front(), Some(&t) if t < cutoff) {
            bucket.timestamps.pop_front();
        }

        let count = bucket.timestamps.len() as u32;
        if count >= self.config.max_requests {
            let oldest = *bucket.timestamps.front().expect("count >= max implies non-empty");
            let retry_after_ms = window_ms.saturating_sub(now_ms.saturating_sub(oldest));
            let retry_after_secs = retry_after_ms.div_ceil(1000);
            let reset_unix = (oldest + window_ms) / 1000;

            warn!(key, retry_after_secs, "rate limit exceeded");
            return Err(RateLimitError::Exceeded {
                key: key.to_string(),
                retry_after_secs,
                limit: self.config.max_requests,
                reset_unix,
            });
        }

        bucket.timestamps.push_back(now_ms);
        let oldest = *bucket.timestamps.front().unwrap();
        Ok(RateLimitOutcome {
            limit: self.config.max_requests,
            remaining: self.config.max_requests - count - 1,
            reset_unix: (oldest + window_ms) / 1000,
        })
    }

    /// Drop buckets with no timestamps left in the window, so long-idle
    /// principals don't hold memory forever. Intended to run on a
    /// background interval; its own lock usage is identical to `check`'s.
    pub fn evict_empty_buckets(&self) {
        let now_ms = now_unix_ms();
        let window_ms = self.config.window.as_millis() as u64;
        let cutoff = now_ms.saturating_sub(window_ms);
        self.buckets.retain(|_, bucket| {
            while matches!(bucket.timestamps.front(), Some(&t) if t < cutoff) {
                bucket.timestamps.pop_front();
            }
            !bucket.timestamps.is_empty()
        });
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig::new(max, Duration::from_millis(window_ms)))
    }

    #[test]
    fn allows_requests_within_limit() {
        let rl = limiter(2, 60_000);
        assert!(rl.check_at("t1", 0).is_ok());
        assert!(rl.check_at("t1", 100).is_ok());
    }

    #[test]
    fn rejects_the_nplus1th_request() {
        let rl = limiter(2, 60_000);
        rl.check_at("t1", 0).unwrap();
        rl.check_at("t1", 100).unwrap();
        let err = rl.check_at("t1", 200).unwrap_err();
        match err {
            RateLimitError::Exceeded { retry_after_secs, .. } => {
                assert!(retry_after_secs > 0);
            }
        }
    }

    #[test]
    fn sliding_window_frees_exactly_one_slot_after_oldest_expires() {
        let rl = limiter(2, 60_000);
        rl.check_at("t1", 0).unwrap();
        rl.check_at("t1", 100).unwrap();
        rl.check_at("t1", 200).unwrap_err();

        // t=0 expires at t=60_000; t=100 expires at t=60_100
        let first_after_expiry = rl.check_at("t1", 61_000);
        assert!(first_after_expiry.is_ok());
        let second_after_expiry = rl.check_at("t1", 61_050);
        assert!(second_after_expiry.is_err());
    }

    #[test]
    fn independent_principals_have_independent_buckets() {
        let rl = limiter(1, 60_000);
        rl.check_at("t1", 0).unwrap();
        assert!(rl.check_at("t2", 0).is_ok());
    }

    #[test]
    fn outcome_reports_remaining_and_reset() {
        let rl = limiter(5, 60_000);
        let outcome = rl.check_at("t1", 0).unwrap();
        assert_eq!(outcome.limit, 5);
        assert_eq!(outcome.remaining, 4);
    }

    #[test]
    fn evict_empty_buckets_drops_expired_keys() {
        let rl = limiter(2, 1_000);
        rl.check_at("stale", 0).unwrap();
        // `evict_empty_buckets` evicts against the real wall clock, which is
        // far past this bucket's 1s window, so its only timestamp is
        // evicted and the now-empty bucket is dropped.
        rl.evict_empty_buckets();
        assert_eq!(rl.bucket_count(), 0);
    }
}
