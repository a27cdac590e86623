//! Coarse request rate limiting in front of all routes.
//!
//! Sliding-window approximation per client key: the previous window's count
//! is weighted by how much of it still overlaps the sliding window and added
//! to the current count. State is shared across all request tasks behind one
//! mutex; entries are pruned as they are touched and swept once the map
//! grows past a high-water mark.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);
const DEFAULT_LIMIT: u64 = 100;
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    /// Count one request for `key` and decide whether it may proceed.
    fn check(&self, key: &str) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _key: &str) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

#[derive(Debug)]
struct WindowEntry {
    window_start: Instant,
    previous_count: u64,
    current_count: u64,
}

/// Sliding-window limiter keyed by client IP.
pub struct SlidingWindowLimiter {
    window: Duration,
    limit: u64,
    entries: Mutex<HashMap<String, WindowEntry>>,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_WINDOW, DEFAULT_LIMIT)
    }

    #[must_use]
    pub fn with_config(window: Duration, limit: u64) -> Self {
        Self {
            window,
            limit,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn weighted_count(&self, entry: &WindowEntry, now: Instant) -> u64 {
        let elapsed = now.duration_since(entry.window_start);
        let overlap = 1.0 - (elapsed.as_secs_f64() / self.window.as_secs_f64()).min(1.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let carried = (entry.previous_count as f64 * overlap) as u64;
        carried + entry.current_count
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn check(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            // A poisoned lock means a panic elsewhere; failing open keeps
            // the limiter from taking the API down with it.
            Err(_) => return RateLimitDecision::Allowed,
        };

        if entries.len() > SWEEP_THRESHOLD {
            let window = self.window;
            entries.retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
        }

        let entry = entries.entry(key.to_string()).or_insert(WindowEntry {
            window_start: now,
            previous_count: 0,
            current_count: 0,
        });

        let elapsed = now.duration_since(entry.window_start);
        if elapsed >= self.window * 2 {
            entry.window_start = now;
            entry.previous_count = 0;
            entry.current_count = 0;
        } else if elapsed >= self.window {
            entry.window_start = entry.window_start + self.window;
            entry.previous_count = entry.current_count;
            entry.current_count = 0;
        }

        if self.weighted_count(entry, now) >= self.limit {
            return RateLimitDecision::Limited;
        }
        entry.current_count += 1;
        RateLimitDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_always_allows() {
        let limiter = NoopRateLimiter;
        for _ in 0..1000 {
            assert_eq!(limiter.check("1.2.3.4"), RateLimitDecision::Allowed);
        }
    }

    #[test]
    fn limit_kicks_in_at_the_configured_count() {
        let limiter = SlidingWindowLimiter::with_config(Duration::from_secs(900), 100);
        for _ in 0..100 {
            assert_eq!(limiter.check("1.2.3.4"), RateLimitDecision::Allowed);
        }
        assert_eq!(limiter.check("1.2.3.4"), RateLimitDecision::Limited);
        assert_eq!(limiter.check("1.2.3.4"), RateLimitDecision::Limited);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = SlidingWindowLimiter::with_config(Duration::from_secs(900), 5);
        for _ in 0..5 {
            assert_eq!(limiter.check("1.1.1.1"), RateLimitDecision::Allowed);
        }
        assert_eq!(limiter.check("1.1.1.1"), RateLimitDecision::Limited);
        assert_eq!(limiter.check("2.2.2.2"), RateLimitDecision::Allowed);
    }

    #[test]
    fn requests_age_out_of_the_window() {
        let limiter = SlidingWindowLimiter::with_config(Duration::from_millis(50), 3);
        for _ in 0..3 {
            assert_eq!(limiter.check("1.2.3.4"), RateLimitDecision::Allowed);
        }
        assert_eq!(limiter.check("1.2.3.4"), RateLimitDecision::Limited);

        // Two full windows later nothing is carried over.
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(limiter.check("1.2.3.4"), RateLimitDecision::Allowed);
    }
}
