//! Rate limit header parsing
//!
//! The backend reports quota per key through response headers:
//!
//! - `x-ratelimit-limit-{minute,hour,day}`: window capacity
//! - `x-ratelimit-remaining-{minute,hour,day}`: requests left in the window
//! - `ratelimit-reset`: seconds until the counters reset (integer or float)
//!
//! Header names match case-insensitively. Values that fail to parse are
//! ignored for that field and never abort parsing.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

pub const LIMIT_MINUTE: &str = "x-ratelimit-limit-minute";
pub const LIMIT_HOUR: &str = "x-ratelimit-limit-hour";
pub const LIMIT_DAY: &str = "x-ratelimit-limit-day";
pub const REMAINING_MINUTE: &str = "x-ratelimit-remaining-minute";
pub const REMAINING_HOUR: &str = "x-ratelimit-remaining-hour";
pub const REMAINING_DAY: &str = "x-ratelimit-remaining-day";
pub const RESET: &str = "ratelimit-reset";

/// Quota snapshot parsed from one response. `None` means the header was
/// absent or unparseable, never zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit_minute: Option<u64>,
    pub limit_hour: Option<u64>,
    pub limit_day: Option<u64>,
    pub remaining_minute: Option<u64>,
    pub remaining_hour: Option<u64>,
    pub remaining_day: Option<u64>,
    /// Absolute instant at which the counters reset
    pub reset_at: Option<Instant>,
}

impl RateLimitInfo {
    /// Parse header pairs relative to the current instant.
    pub fn parse<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        Self::parse_at(headers, Instant::now())
    }

    /// Parse header pairs, converting `ratelimit-reset` to `now + seconds`.
    pub fn parse_at<'a, I>(headers: I, now: Instant) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut info = RateLimitInfo::default();

        for (name, value) in headers {
            let name = name.trim().to_ascii_lowercase();
            let slot = match name.as_str() {
                LIMIT_MINUTE => &mut info.limit_minute,
                LIMIT_HOUR => &mut info.limit_hour,
                LIMIT_DAY => &mut info.limit_day,
                REMAINING_MINUTE => &mut info.remaining_minute,
                REMAINING_HOUR => &mut info.remaining_hour,
                REMAINING_DAY => &mut info.remaining_day,
                RESET => {
                    match parse_seconds(value).and_then(|after| now.checked_add(after)) {
                        Some(at) => info.reset_at = Some(at),
                        None => debug!(header = RESET, value, "ignoring unparseable rate limit header"),
                    }
                    continue;
                }
                _ => continue,
            };

            match value.trim().parse::<u64>() {
                Ok(n) => *slot = Some(n),
                Err(e) => debug!(header = %name, value, error = %e, "ignoring unparseable rate limit header"),
            }
        }

        info
    }
}

/// Seconds as integer or float; negative and non-finite values are rejected.
/// Values too large to land on a representable instant are dropped by the caller.
fn parse_seconds(value: &str) -> Option<Duration> {
    let secs = value.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}
