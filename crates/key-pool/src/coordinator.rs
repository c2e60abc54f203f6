//! Rotation coordinator: the shared scheduler behind every key selection
//!
//! One `tokio::sync::Mutex` guards the registry and the round-robin cursor.
//! Selection, usage recording, forced exhaustion and stats each hold it for
//! their whole duration, so they never interleave on the same pool. Nothing
//! re-enters the lock while holding it.
//!
//! When a strict selection finds every key exhausted, the coordinator drops
//! the lock, sleeps one backoff interval and re-validates once. Other callers
//! keep recording usage and reading stats during the wait. If the second pass
//! still finds nothing, the caller gets a best-effort key rather than an error.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use common::key_hint;

use crate::error::{Error, Result};
use crate::ratelimit::RateLimitInfo;
use crate::registry::KeyRegistry;
use crate::strategy::{self, Strategy};
use crate::usage::UsageTracker;

/// Backoff applied when none is configured.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);

/// Longest accepted backoff (one day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// A key handed out for one attempt, with its last observed quota snapshot.
#[derive(Debug, Clone)]
pub struct Selection {
    pub key: String,
    pub rate_limit: Option<RateLimitInfo>,
}

impl Selection {
    /// Log-safe rendering of the selected key.
    pub fn hint(&self) -> String {
        key_hint(&self.key)
    }
}

/// Per-key entry in `PoolStats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyStats {
    /// Truncated key prefix
    pub key: String,
    pub exhausted: bool,
    pub requests_remaining: u64,
    pub requests_limit: u64,
}

/// Aggregate pool state for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total_keys: usize,
    pub exhausted_keys: usize,
    pub strategy: Strategy,
    /// Sum of remaining requests across non-exhausted keys
    pub total_remaining: u64,
    pub keys: Vec<KeyStats>,
}

impl PoolStats {
    /// healthy: no key exhausted, degraded: some, unhealthy: all.
    pub fn status(&self) -> &'static str {
        if self.exhausted_keys == 0 {
            "healthy"
        } else if self.exhausted_keys < self.total_keys {
            "degraded"
        } else {
            "unhealthy"
        }
    }
}

struct RotationState {
    registry: KeyRegistry,
    cursor: usize,
}

impl RotationState {
    fn selection(&self, idx: usize) -> Selection {
        Selection {
            key: self.registry.keys_in_order()[idx].clone(),
            rate_limit: self.registry.trackers()[idx].last_observed.clone(),
        }
    }
}

/// Thread-safe scheduler over one key pool.
pub struct RotationCoordinator {
    state: Mutex<RotationState>,
    strategy: Strategy,
    backoff: Duration,
}

impl RotationCoordinator {
    /// Build a coordinator over `keys` (trimmed and deduplicated).
    ///
    /// Fails with `Configuration` when no usable key remains or `backoff` is
    /// zero or longer than `MAX_BACKOFF`.
    pub fn new<I, S>(keys: I, strategy: Strategy, backoff: Duration) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if backoff.is_zero() {
            return Err(Error::Configuration(
                "backoff duration must be greater than 0".into(),
            ));
        }
        if backoff > MAX_BACKOFF {
            return Err(Error::Configuration(format!(
                "backoff duration must not exceed {}s, got {}s",
                MAX_BACKOFF.as_secs(),
                backoff.as_secs()
            )));
        }
        let registry = KeyRegistry::new(keys)?;
        info!(
            keys = registry.len(),
            strategy = %strategy,
            backoff_secs = backoff.as_secs_f64(),
            "key pool initialized"
        );
        Ok(Self {
            state: Mutex::new(RotationState {
                registry,
                cursor: 0,
            }),
            strategy,
            backoff,
        })
    }

    /// End of a backoff interval starting at `now`.
    fn backoff_deadline(&self, now: Instant) -> Instant {
        // Bounded by MAX_BACKOFF, so the fallback only guards clock extremes.
        now.checked_add(self.backoff).unwrap_or(now)
    }

    /// Select the next key.
    ///
    /// With `skip_exhausted` false, exhausted keys are avoided when possible
    /// but some key is always returned immediately. With `skip_exhausted`
    /// true and every key exhausted, waits one backoff interval (lock
    /// released) and selects again.
    pub async fn next_key(&self, skip_exhausted: bool) -> Selection {
        if !skip_exhausted {
            return self.select_any().await;
        }
        if let Some(selection) = self.select_strict().await {
            return selection;
        }

        warn!(
            backoff_secs = self.backoff.as_secs_f64(),
            "all keys exhausted, waiting for backoff"
        );
        tokio::time::sleep(self.backoff).await;

        match self.select_strict().await {
            Some(selection) => selection,
            None => {
                warn!("keys still exhausted after backoff, using best-effort key");
                self.select_any().await
            }
        }
    }

    async fn select_strict(&self) -> Option<Selection> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let idx = strategy::select_strict(
            self.strategy,
            &mut state.registry,
            &mut state.cursor,
            Instant::now(),
        )?;
        Some(self.selected(state, idx))
    }

    async fn select_any(&self) -> Selection {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let idx = strategy::select_any(
            self.strategy,
            &mut state.registry,
            &mut state.cursor,
            Instant::now(),
        );
        self.selected(state, idx)
    }

    fn selected(&self, state: &RotationState, idx: usize) -> Selection {
        let selection = state.selection(idx);
        metrics::counter!("key_pool_selections_total", "strategy" => self.strategy.as_str())
            .increment(1);
        debug!(key = %selection.hint(), strategy = %self.strategy, "key selected");
        selection
    }

    /// Update a key's usage from response headers.
    ///
    /// Only the minute window drives exhaustion; without
    /// `x-ratelimit-remaining-minute` this is a no-op.
    pub async fn record_usage<'a, I>(&self, key: &str, headers: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let info = RateLimitInfo::parse(headers);
        self.record_rate_limit(key, info).await;
    }

    /// Update a key's usage from an already parsed snapshot.
    pub async fn record_rate_limit(&self, key: &str, info: RateLimitInfo) {
        let Some(remaining) = info.remaining_minute else {
            debug!(key = %key_hint(key), "no minute-window remaining header, usage unchanged");
            return;
        };

        let now = Instant::now();
        let deadline = info
            .reset_at
            .filter(|at| *at > now)
            .unwrap_or_else(|| self.backoff_deadline(now));
        let limit = info.limit_minute;

        let mut state = self.state.lock().await;
        let Some(tracker) = state.registry.tracker_for_mut(key) else {
            warn!(key = %key_hint(key), "usage reported for unknown key, ignoring");
            return;
        };

        let was_exhausted = tracker.is_exhausted;
        let exhausted = tracker.observe(remaining, limit, info, deadline, now);
        debug!(
            key = %key_hint(key),
            remaining,
            limit = tracker.requests_limit,
            exhausted,
            "updated key usage (minute window)"
        );
        if exhausted && !was_exhausted {
            metrics::counter!("key_pool_exhaustions_total", "reason" => "usage").increment(1);
            warn!(
                key = %key_hint(key),
                remaining,
                backoff_secs = (deadline - now).as_secs_f64(),
                "key quota nearly exhausted, backing off"
            );
        }
    }

    /// Force a key into backoff regardless of its last observed count.
    pub async fn mark_exhausted(&self, key: &str) {
        let until = self.backoff_deadline(Instant::now());
        let mut state = self.state.lock().await;
        match state.registry.tracker_for_mut(key) {
            Some(tracker) => {
                tracker.force_exhausted(until);
                metrics::counter!("key_pool_exhaustions_total", "reason" => "forced").increment(1);
                warn!(
                    key = %key_hint(key),
                    backoff_secs = self.backoff.as_secs_f64(),
                    "key marked exhausted"
                );
            }
            None => warn!(key = %key_hint(key), "cannot mark unknown key exhausted"),
        }
    }

    /// Aggregate counts for observability. Read-only: does not recover keys.
    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        let registry = &state.registry;

        let keys: Vec<KeyStats> = registry
            .keys_in_order()
            .iter()
            .zip(registry.trackers())
            .map(|(key, tracker)| KeyStats {
                key: key_hint(key),
                exhausted: tracker.is_exhausted,
                requests_remaining: tracker.requests_remaining,
                requests_limit: tracker.requests_limit,
            })
            .collect();

        let exhausted_keys = keys.iter().filter(|k| k.exhausted).count();
        let total_remaining = keys
            .iter()
            .filter(|k| !k.exhausted)
            .fold(0u64, |sum, k| sum.saturating_add(k.requests_remaining));

        PoolStats {
            total_keys: registry.len(),
            exhausted_keys,
            strategy: self.strategy,
            total_remaining,
            keys,
        }
    }

    /// Snapshot of one key's tracker.
    pub async fn tracker(&self, key: &str) -> Option<UsageTracker> {
        self.state.lock().await.registry.tracker_for(key).cloned()
    }
}
