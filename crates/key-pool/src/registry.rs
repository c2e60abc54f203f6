//! Ordered key set with one usage tracker per key

use std::collections::HashSet;

use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::usage::UsageTracker;

/// Keys in first-seen order and their trackers. Fixed after construction.
#[derive(Debug)]
pub struct KeyRegistry {
    keys: Vec<String>,
    trackers: Vec<UsageTracker>,
}

impl KeyRegistry {
    /// Trim keys, drop blanks and collapse duplicates keeping first-seen order.
    ///
    /// Fails with `Configuration` when nothing usable remains.
    pub fn new<I, S>(keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let keys: Vec<String> = keys
            .into_iter()
            .filter_map(|k| {
                let trimmed = k.as_ref().trim();
                (!trimmed.is_empty() && seen.insert(trimmed.to_string()))
                    .then(|| trimmed.to_string())
            })
            .collect();

        if keys.is_empty() {
            return Err(Error::Configuration("no valid API keys provided".into()));
        }

        let now = Instant::now();
        let trackers = keys.iter().map(|_| UsageTracker::new(now)).collect();
        Ok(Self { keys, trackers })
    }

    pub fn keys_in_order(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }

    pub fn tracker_for(&self, key: &str) -> Option<&UsageTracker> {
        self.index_of(key).map(|i| &self.trackers[i])
    }

    pub fn tracker_for_mut(&mut self, key: &str) -> Option<&mut UsageTracker> {
        self.index_of(key).map(|i| &mut self.trackers[i])
    }

    pub(crate) fn trackers(&self) -> &[UsageTracker] {
        &self.trackers
    }

    pub(crate) fn trackers_mut(&mut self) -> &mut [UsageTracker] {
        &mut self.trackers
    }
}
