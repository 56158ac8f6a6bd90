//! Per-user fixed-window request gate.
//!
//! Entries live in a Moka cache with an idle TTL, so inactive users are
//! evicted without a sweeper. Each check is a single atomic compute on the
//! user's entry, which keeps concurrent requests from the same user from
//! racing on the counter.

use chrono::{DateTime, Utc};
use moka::ops::compute::Op;
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RateLimitSettings;

/// Source of "now" for window arithmetic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Denied,
}

impl RateLimitDecision {
    pub fn is_allowed(self) -> bool {
        self == RateLimitDecision::Allowed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub window_start: DateTime<Utc>,
    pub count: u32,
}

pub struct RateLimiter {
    entries: Cache<Arc<str>, RateLimitEntry>,
    clock: Arc<dyn Clock>,
    settings: RateLimitSettings,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: RateLimitSettings, clock: Arc<dyn Clock>) -> Self {
        let entries = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(settings.entry_ttl)
            .build();

        Self {
            entries,
            clock,
            settings,
        }
    }

    /// Gate a request using the configured limits.
    pub fn check(&self, user_id: &str) -> RateLimitDecision {
        self.check_and_consume(
            user_id,
            self.settings.max_requests_per_window,
            self.settings.window,
        )
    }

    /// Count one request for `user_id` against `max_per_window` per `window`.
    ///
    /// A window resets wholesale once more than `window` has elapsed since it
    /// started. A denied request is not counted.
    pub fn check_and_consume(
        &self,
        user_id: &str,
        max_per_window: u32,
        window: Duration,
    ) -> RateLimitDecision {
        let now = self.clock.now();
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        let key: Arc<str> = Arc::from(user_id);
        let mut decision = RateLimitDecision::Denied;

        self.entries.entry(key).and_compute_with(|current| {
            let next = match current.map(|e| e.into_value()) {
                Some(entry) if now - entry.window_start <= window => {
                    if entry.count >= max_per_window {
                        return Op::Nop;
                    }
                    RateLimitEntry {
                        count: entry.count + 1,
                        ..entry
                    }
                }
                _ if max_per_window == 0 => return Op::Nop,
                _ => RateLimitEntry {
                    window_start: now,
                    count: 1,
                },
            };
            decision = RateLimitDecision::Allowed;
            Op::Put(next)
        });

        if !decision.is_allowed() {
            metrics::counter!("rate_limit_denied_total").increment(1);
            tracing::info!(user_id, "Rate limit exceeded");
        }

        decision
    }

    /// Current window for a user, if one is being tracked.
    pub fn entry(&self, user_id: &str) -> Option<RateLimitEntry> {
        self.entries.get(user_id)
    }
}
