//! Sliding-window rate limiting.

use std::collections::HashMap;

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{AuthzError, Result};

/// Rate limiter configuration.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Maximum number of calls per key within the window.
    pub limit: usize,
    /// Trailing window length.
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(60),
        }
    }
}

/// A per-key sliding-window guard.
///
/// The disabled variant preserves the call contract so callers never
/// branch on whether limiting is configured.
pub enum RateLimiter {
    Sliding(SlidingWindow),
    Disabled,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        RateLimiter::Sliding(SlidingWindow::new(config))
    }

    pub fn disabled() -> Self {
        RateLimiter::Disabled
    }

    /// Records the current timestamp under `key` and raises
    /// [`AuthzError::TooManyRequests`] when the count within the trailing
    /// window exceeds the threshold.
    pub fn limit(&self, key: &str) -> Result<()> {
        match self {
            RateLimiter::Sliding(window) => window.limit(key),
            RateLimiter::Disabled => Ok(()),
        }
    }
}

pub struct SlidingWindow {
    config: RateLimiterConfig,
    hits: Mutex<HashMap<String, Vec<Instant>>>,
}

impl SlidingWindow {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            hits: Mutex::new(HashMap::new()),
        }
    }

    fn limit(&self, key: &str) -> Result<()> {
        let now = Instant::now();
        let mut hits = self.hits.lock();

        // Prune every key, not just the one being checked, so memory
        // stays bounded by the number of keys active within one window.
        hits.retain(|_, stamps| {
            stamps.retain(|stamp| now.duration_since(*stamp) < self.config.window);
            !stamps.is_empty()
        });

        let stamps = hits.entry(key.to_string()).or_default();
        stamps.push(now);
        if stamps.len() > self.config.limit {
            return Err(AuthzError::TooManyRequests);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: usize, window: Duration) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig { limit, window })
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_within_window() {
        let limiter = limiter(3, Duration::from_secs(60));
        for _ in 0..3 {
            limiter.limit("A").unwrap();
        }
        assert!(matches!(
            limiter.limit("A"),
            Err(AuthzError::TooManyRequests)
        ));
        // Other keys are unaffected.
        limiter.limit("B").unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets() {
        let limiter = limiter(3, Duration::from_secs(60));
        for _ in 0..3 {
            limiter.limit("A").unwrap();
        }
        assert!(limiter.limit("A").is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        limiter.limit("A").unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_bounds_memory() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            limit: 3,
            window: Duration::from_secs(60),
        });
        limiter.limit("stale").unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        // Touching any key prunes all keys.
        limiter.limit("fresh").unwrap();
        if let RateLimiter::Sliding(window) = &limiter {
            assert!(!window.hits.lock().contains_key("stale"));
        }
    }

    #[test]
    fn test_disabled_is_noop() {
        let limiter = RateLimiter::disabled();
        for _ in 0..1000 {
            limiter.limit("A").unwrap();
        }
    }
}
