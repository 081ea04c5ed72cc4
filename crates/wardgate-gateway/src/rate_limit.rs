//! Request-rate limiting.
//!
//! Two independent checks protect two different resources: the sliding
//! request-rate window keeps a flood of auto-allowed requests from
//! saturating the gateway, and the pending-approval cap (enforced by the
//! orchestrator against its pending map) keeps ask-happy agents from
//! exhausting the messenger's patience. Both reject with -32006.

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use wardgate_config::RateLimitConfig;

/// Tracks request timestamps in a sliding window.
#[derive(Debug)]
struct WindowTracker {
    requests: Vec<DateTime<Utc>>,
    max_requests: u32,
    window: Duration,
}

impl WindowTracker {
    fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window,
        }
    }

    /// Try to record a request at `now`. Returns false when the window is
    /// already full.
    fn try_request(&mut self, now: DateTime<Utc>) -> bool {
        let window_start = now - self.window;
        self.requests.retain(|t| *t > window_start);

        if self.requests.len() >= self.max_requests as usize {
            return false;
        }
        self.requests.push(now);
        true
    }
}

/// Sliding-window limiter over incoming `tool_request` frames, plus the
/// configured pending-approval cap.
#[derive(Debug)]
pub struct RateLimiter {
    window: Mutex<WindowTracker>,
    max_pending: usize,
}

impl RateLimiter {
    /// Build a limiter from configuration.
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            window: Mutex::new(WindowTracker::new(
                config.max_requests_per_minute,
                Duration::minutes(1),
            )),
            max_pending: config.max_pending_approvals,
        }
    }

    /// Record one incoming request; false means reject with -32006.
    pub async fn check_request(&self) -> bool {
        self.window.lock().await.try_request(Utc::now())
    }

    /// How many `ask` approvals may be outstanding at once.
    #[must_use]
    pub fn max_pending(&self) -> usize {
        self.max_pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(per_minute: u32, pending: usize) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            max_requests_per_minute: per_minute,
            max_pending_approvals: pending,
        })
    }

    #[tokio::test]
    async fn allows_up_to_the_window_cap() {
        let limiter = limiter(3, 10);
        assert!(limiter.check_request().await);
        assert!(limiter.check_request().await);
        assert!(limiter.check_request().await);
        assert!(!limiter.check_request().await);
    }

    #[test]
    fn window_expiry_frees_slots() {
        let mut tracker = WindowTracker::new(2, Duration::minutes(1));
        let start = Utc::now();
        assert!(tracker.try_request(start));
        assert!(tracker.try_request(start));
        assert!(!tracker.try_request(start));

        // 61 seconds later both slots have rolled out of the window.
        let later = start + Duration::seconds(61);
        assert!(tracker.try_request(later));
        assert!(tracker.try_request(later));
        assert!(!tracker.try_request(later));
    }

    #[test]
    fn boundary_request_still_inside_window_counts() {
        let mut tracker = WindowTracker::new(1, Duration::minutes(1));
        let start = Utc::now();
        assert!(tracker.try_request(start));
        // Exactly at the window edge the old request has not yet expired
        // (strictly-greater comparison).
        assert!(!tracker.try_request(start + Duration::minutes(1)));
        assert!(tracker.try_request(start + Duration::minutes(1) + Duration::milliseconds(1)));
    }

    #[tokio::test]
    async fn pending_cap_is_exposed() {
        assert_eq!(limiter(60, 7).max_pending(), 7);
    }
}
