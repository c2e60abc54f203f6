//! Outcome classification for backend attempts
//!
//! Maps response statuses and transport failures onto `ErrorClassification`,
//! which decides whether the retry policy rotates to another key.

use backend::{ErrorClassification, TransportError};

/// Substrings marking a transport failure message as retryable on another key.
const RETRYABLE_INDICATORS: &[&str] = &[
    "rate limit",
    "429",
    "quota exceeded",
    "exceeded",
    "timeout",
    "connection",
    "503",
    "502",
    "500",
    "internal server error",
];

/// Classify a response status. `None` means success (2xx).
///
/// 429 is RateLimited, 5xx is ServerError, every other non-2xx is Fatal.
pub fn classify_status(status: u16) -> Option<ErrorClassification> {
    match status {
        200..=299 => None,
        429 => Some(ErrorClassification::RateLimited),
        500..=599 => Some(ErrorClassification::ServerError),
        _ => Some(ErrorClassification::Fatal),
    }
}

/// Classify a transport failure.
///
/// Timeouts and connection failures are always Transient. Other failures are
/// Transient only when their message carries a retryable indicator.
pub fn classify_transport(error: &TransportError) -> ErrorClassification {
    match error {
        TransportError::Timeout(_) | TransportError::Connect(_) => ErrorClassification::Transient,
        TransportError::Other(message) if is_retryable_message(message) => {
            ErrorClassification::Transient
        }
        TransportError::Other(_) => ErrorClassification::Fatal,
    }
}

/// Case-insensitive match against the retryable indicator list.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_INDICATORS
        .iter()
        .any(|indicator| lower.contains(indicator))
}
