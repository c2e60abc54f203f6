//! API key rotation pool
//!
//! Spreads backend requests over a fixed set of API keys, tracks per-key rate
//! limit headroom from response headers, and retries once on another key when
//! a key is rate limited or the backend fails transiently.
//!
//! Key lifecycle:
//! 1. Keys load into a `KeyRegistry`, each with a fresh `UsageTracker`
//! 2. `RotationCoordinator::next_key` picks a key with the configured `Strategy`
//! 3. Response headers update the tracker; low minute-window headroom exhausts the key
//! 4. A 429 or retryable transport failure forces the key into backoff
//! 5. Once the backoff deadline passes, the next selection returns the key to rotation

pub mod classify;
pub mod coordinator;
pub mod error;
pub mod ratelimit;
pub mod registry;
pub mod retry;
pub mod strategy;
pub mod usage;

pub use classify::{classify_status, classify_transport, is_retryable_message};
pub use coordinator::{
    DEFAULT_BACKOFF, KeyStats, MAX_BACKOFF, PoolStats, RotationCoordinator, Selection,
};
pub use error::{Error, Result};
pub use ratelimit::RateLimitInfo;
pub use registry::KeyRegistry;
pub use retry::{Completed, MAX_ROTATIONS, RetryPolicy};
pub use strategy::Strategy;
pub use usage::{EXHAUSTION_THRESHOLD, UsageTracker};
