//! Error types for pool operations
//!
//! Every variant identifies keys by hint only (`sk-live-01...`), never by
//! full value.

use backend::TransportError;
use reqwest::header::HeaderMap;

/// Errors surfaced by the pool and the retry policy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("rate limit exceeded on key {key} (status {status})")]
    RateLimited {
        key: String,
        status: u16,
        headers: HeaderMap,
        body: String,
    },

    #[error("backend server error on key {key} (status {status})")]
    ServerError {
        key: String,
        status: u16,
        headers: HeaderMap,
        body: String,
    },

    #[error("transport failure on key {key}: {source}")]
    Transport {
        key: String,
        #[source]
        source: TransportError,
    },

    #[error("request rejected on key {key} (status {status})")]
    Rejected {
        key: String,
        status: u16,
        headers: HeaderMap,
        body: String,
    },

    #[error("request failed on key {key}: {source}")]
    Fatal {
        key: String,
        #[source]
        source: TransportError,
    },
}

impl Error {
    /// Stable label for responses, logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::RateLimited { .. } => "rate_limited",
            Error::ServerError { .. } => "server_error",
            Error::Transport { .. } => "transport",
            Error::Rejected { .. } => "rejected",
            Error::Fatal { .. } => "fatal",
        }
    }

    /// Final upstream status and body, when the failure came with a response.
    pub fn upstream_response(&self) -> Option<(u16, &str)> {
        match self {
            Error::RateLimited { status, body, .. }
            | Error::ServerError { status, body, .. }
            | Error::Rejected { status, body, .. } => Some((*status, body.as_str())),
            _ => None,
        }
    }

    /// Headers of the final upstream response, when the failure came with one.
    pub fn upstream_headers(&self) -> Option<&HeaderMap> {
        match self {
            Error::RateLimited { headers, .. }
            | Error::ServerError { headers, .. }
            | Error::Rejected { headers, .. } => Some(headers),
            _ => None,
        }
    }

    /// Whether the failure was a transport timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Transport {
                source: TransportError::Timeout(_),
                ..
            } | Error::Fatal {
                source: TransportError::Timeout(_),
                ..
            }
        )
    }
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
