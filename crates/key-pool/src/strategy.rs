//! Key selection strategies
//!
//! Selection runs in three steps over a `KeyRegistry`:
//! 1. Exhausted keys whose backoff deadline has passed are reset in place.
//! 2. Candidates are the non-exhausted keys, in registry order.
//! 3. The strategy picks one candidate.
//!
//! With no candidates, `select_strict` yields `None` and the caller decides
//! whether to wait; `select_any` picks among all keys.

use std::fmt;
use std::str::FromStr;

use rand::RngExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::info;

use common::key_hint;

use crate::error::Error;
use crate::registry::KeyRegistry;

/// How the next key is chosen among candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Shared cursor, advanced by one slot per selection
    #[default]
    RoundRobin,
    /// Candidate with the most remaining requests (ties to registry order)
    LeastUsed,
    /// Uniform choice
    Random,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::LeastUsed => "least_used",
            Strategy::Random => "random",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round_robin" => Ok(Strategy::RoundRobin),
            "least_used" => Ok(Strategy::LeastUsed),
            "random" => Ok(Strategy::Random),
            other => Err(Error::Configuration(format!(
                "unknown rotation strategy {other:?} (expected round_robin, least_used or random)"
            ))),
        }
    }
}

/// Reset keys whose backoff elapsed, then list non-exhausted keys.
fn partition(registry: &mut KeyRegistry, now: Instant) -> Vec<usize> {
    let mut candidates = Vec::with_capacity(registry.len());
    for idx in 0..registry.len() {
        let tracker = &mut registry.trackers_mut()[idx];
        let recovered = tracker.recover_if_elapsed(now);
        let exhausted = tracker.is_exhausted;
        if recovered {
            info!(key = %key_hint(&registry.keys_in_order()[idx]), "backoff expired, key available again");
            metrics::counter!("key_pool_recoveries_total").increment(1);
        }
        if !exhausted {
            candidates.push(idx);
        }
    }
    candidates
}

/// Pick one index from `candidates` (non-empty).
fn choose(
    strategy: Strategy,
    registry: &KeyRegistry,
    candidates: &[usize],
    cursor: &mut usize,
) -> usize {
    debug_assert!(!candidates.is_empty());
    match strategy {
        Strategy::RoundRobin => {
            let idx = candidates[*cursor % candidates.len()];
            *cursor = cursor.wrapping_add(1);
            idx
        }
        Strategy::LeastUsed => {
            let trackers = registry.trackers();
            candidates
                .iter()
                .copied()
                .min_by_key(|&i| std::cmp::Reverse(trackers[i].requests_remaining))
                .unwrap_or(candidates[0])
        }
        Strategy::Random => candidates[rand::rng().random_range(0..candidates.len())],
    }
}

/// Strategy pick among non-exhausted keys; `None` when every key is exhausted.
pub(crate) fn select_strict(
    strategy: Strategy,
    registry: &mut KeyRegistry,
    cursor: &mut usize,
    now: Instant,
) -> Option<usize> {
    let candidates = partition(registry, now);
    if candidates.is_empty() {
        return None;
    }
    Some(choose(strategy, registry, &candidates, cursor))
}

/// Strategy pick that always yields a key, falling back to the whole
/// registry when every key is exhausted.
pub(crate) fn select_any(
    strategy: Strategy,
    registry: &mut KeyRegistry,
    cursor: &mut usize,
    now: Instant,
) -> usize {
    let mut candidates = partition(registry, now);
    if candidates.is_empty() {
        candidates = (0..registry.len()).collect();
    }
    choose(strategy, registry, &candidates, cursor)
}
