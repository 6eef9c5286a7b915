//! Fixed-window request rate limiting.
//!
//! Counters live in a moka cache with a time-to-live equal to the
//! window, so a client's window starts at its first request and the
//! counter evaporates on its own when the window ends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

use crate::config::RateLimitConfig;

pub struct RateLimiter {
    counters: Cache<String, Arc<AtomicU64>>,
    max_requests: u64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            counters: Cache::builder()
                .time_to_live(Duration::from_secs(config.window_secs))
                .build(),
            max_requests: config.max_requests,
        }
    }

    /// Records one request for `key` and reports whether it is within
    /// the window's budget.
    pub fn allow(&self, key: &str) -> bool {
        let counter = self
            .counters
            .get_with(key.to_string(), || Arc::new(AtomicU64::new(0)));
        let used = counter.fetch_add(1, Ordering::Relaxed);
        used < self.max_requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            window_secs: 900,
        })
    }

    #[test]
    fn test_allows_up_to_max_then_rejects() {
        let limiter = limiter(5);
        for _ in 0..5 {
            assert!(limiter.allow("client-1"));
        }
        assert!(!limiter.allow("client-1"));
        assert!(!limiter.allow("client-1"));
    }

    #[test]
    fn test_clients_have_independent_budgets() {
        let limiter = limiter(2);
        assert!(limiter.allow("client-1"));
        assert!(limiter.allow("client-1"));
        assert!(!limiter.allow("client-1"));

        assert!(limiter.allow("client-2"));
    }

    #[test]
    fn test_window_expiry_resets_budget() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 1,
            window_secs: 1,
        });
        assert!(limiter.allow("client-1"));
        assert!(!limiter.allow("client-1"));

        std::thread::sleep(Duration::from_millis(1100));
        // moka expires lazily; run pending maintenance first.
        limiter.counters.run_pending_tasks();
        assert!(limiter.allow("client-1"));
    }
}
