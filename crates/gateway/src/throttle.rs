//! Per-user rate limiting for the realtime surface.
//!
//! Fixed windows keyed by (user, scope). Messages get a short burst window;
//! search requests a longer one to damp re-search storms.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};

const CLEANUP_EVERY_CHECKS: u64 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThrottleScope {
    Message,
    Search,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started_at: Instant,
    count: usize,
}

#[derive(Debug, Clone, Copy)]
struct RateLimit {
    max_requests: usize,
    window: Duration,
}

#[derive(Debug, Clone, Copy)]
struct ThrottleLimits {
    message: RateLimit,
    search: RateLimit,
}

impl Default for ThrottleLimits {
    fn default() -> Self {
        Self {
            // Sustained conversation is fine; paste floods are not.
            message: RateLimit {
                max_requests: 30,
                window: Duration::from_secs(10),
            },
            // Re-search storms put pressure on the matcher tick.
            search: RateLimit {
                max_requests: 10,
                window: Duration::from_secs(60),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allowed,
    Denied { retry_after: Duration },
}

/// Fixed-window throttle over user ids.
#[derive(Clone)]
pub struct UserThrottle {
    limits: ThrottleLimits,
    buckets: Arc<DashMap<(String, ThrottleScope), WindowState>>,
    checks_seen: Arc<AtomicU64>,
}

impl Default for UserThrottle {
    fn default() -> Self {
        Self::new()
    }
}

impl UserThrottle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            limits: ThrottleLimits::default(),
            buckets: Arc::new(DashMap::new()),
            checks_seen: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn check(&self, user_id: &str, scope: ThrottleScope) -> ThrottleDecision {
        self.check_at(user_id, scope, Instant::now())
    }

    fn check_at(&self, user_id: &str, scope: ThrottleScope, now: Instant) -> ThrottleDecision {
        let limit = match scope {
            ThrottleScope::Message => self.limits.message,
            ThrottleScope::Search => self.limits.search,
        };

        let decision = match self.buckets.entry((user_id.to_string(), scope)) {
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                let elapsed = now.duration_since(state.started_at);
                if elapsed >= limit.window {
                    state.started_at = now;
                    state.count = 1;
                    ThrottleDecision::Allowed
                } else if state.count < limit.max_requests {
                    state.count += 1;
                    ThrottleDecision::Allowed
                } else {
                    ThrottleDecision::Denied {
                        retry_after: limit.window.saturating_sub(elapsed),
                    }
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(WindowState {
                    started_at: now,
                    count: 1,
                });
                ThrottleDecision::Allowed
            },
        };

        self.cleanup_if_needed(now);
        decision
    }

    fn cleanup_if_needed(&self, now: Instant) {
        let seen = self.checks_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if !seen.is_multiple_of(CLEANUP_EVERY_CHECKS) {
            return;
        }
        let stale_after = self
            .limits
            .message
            .window
            .max(self.limits.search.window)
            .saturating_mul(3);
        self.buckets
            .retain(|_, state| now.duration_since(state.started_at) <= stale_after);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_limits_and_resets() {
        let throttle = UserThrottle::new();
        let now = Instant::now();

        for _ in 0..30 {
            assert_eq!(
                throttle.check_at("u1", ThrottleScope::Message, now),
                ThrottleDecision::Allowed
            );
        }
        let denied = throttle.check_at("u1", ThrottleScope::Message, now);
        assert!(matches!(denied, ThrottleDecision::Denied { .. }));

        // A fresh window lets the user through again.
        assert_eq!(
            throttle.check_at("u1", ThrottleScope::Message, now + Duration::from_secs(11)),
            ThrottleDecision::Allowed
        );
    }

    #[test]
    fn scopes_and_users_are_independent() {
        let throttle = UserThrottle::new();
        let now = Instant::now();

        for _ in 0..30 {
            throttle.check_at("u1", ThrottleScope::Message, now);
        }
        assert!(matches!(
            throttle.check_at("u1", ThrottleScope::Message, now),
            ThrottleDecision::Denied { .. }
        ));
        assert_eq!(
            throttle.check_at("u1", ThrottleScope::Search, now),
            ThrottleDecision::Allowed
        );
        assert_eq!(
            throttle.check_at("u2", ThrottleScope::Message, now),
            ThrottleDecision::Allowed
        );
    }
}
