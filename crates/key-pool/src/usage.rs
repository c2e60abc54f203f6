//! Per-key usage state
//!
//! Transitions:
//! - Fresh → observed (response headers recorded)
//! - observed → Exhausted (minute remaining below `EXHAUSTION_THRESHOLD`, or forced after a 429)
//! - Exhausted → Available (backoff deadline reached, observed lazily at selection time)

use tokio::time::Instant;

use crate::ratelimit::RateLimitInfo;

/// Remaining count assumed before the backend has reported anything.
pub const DEFAULT_REQUESTS_REMAINING: u64 = 999_999;

/// Window capacity assumed until the backend reports `x-ratelimit-limit-minute`.
pub const DEFAULT_REQUESTS_LIMIT: u64 = 1000;

/// A key whose minute-window remaining count drops below this is exhausted.
pub const EXHAUSTION_THRESHOLD: u64 = 10;

/// Mutable usage record for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageTracker {
    pub requests_remaining: u64,
    pub requests_limit: u64,
    pub last_reset_time: Instant,
    pub last_used_time: Instant,
    pub is_exhausted: bool,
    /// `None` means no deadline was ever set
    pub backoff_until: Option<Instant>,
    /// Last snapshot recorded for this key
    pub last_observed: Option<RateLimitInfo>,
}

impl UsageTracker {
    pub fn new(now: Instant) -> Self {
        Self {
            requests_remaining: DEFAULT_REQUESTS_REMAINING,
            requests_limit: DEFAULT_REQUESTS_LIMIT,
            last_reset_time: now,
            last_used_time: now,
            is_exhausted: false,
            backoff_until: None,
            last_observed: None,
        }
    }

    /// Whether the backoff deadline has been reached at `now`.
    pub fn backoff_elapsed(&self, now: Instant) -> bool {
        self.backoff_until.is_none_or(|until| now >= until)
    }

    /// Clear exhaustion if its deadline has passed. Returns true when the
    /// tracker was reset by this call.
    pub fn recover_if_elapsed(&mut self, now: Instant) -> bool {
        if self.is_exhausted && self.backoff_elapsed(now) {
            self.is_exhausted = false;
            self.requests_remaining = self.requests_limit;
            self.last_reset_time = now;
            true
        } else {
            false
        }
    }

    /// Apply a minute-window observation. `deadline` is where the backoff
    /// ends if the observation exhausts the key. Returns the new exhaustion flag.
    pub fn observe(
        &mut self,
        remaining: u64,
        limit: Option<u64>,
        info: RateLimitInfo,
        deadline: Instant,
        now: Instant,
    ) -> bool {
        self.requests_remaining = remaining;
        if let Some(limit) = limit {
            self.requests_limit = limit;
        }
        self.last_reset_time = now;
        self.last_used_time = now;
        self.is_exhausted = remaining < EXHAUSTION_THRESHOLD;
        if self.is_exhausted {
            self.backoff_until = Some(deadline);
        }
        self.last_observed = Some(info);
        self.is_exhausted
    }

    /// Force exhaustion until `until`, whatever the last observed count.
    pub fn force_exhausted(&mut self, until: Instant) {
        self.is_exhausted = true;
        self.backoff_until = Some(until);
    }
}
