//! Backend abstraction for the rate-limited upstream service
//!
//! Defines the `Backend` trait that decouples the rotation scheduler from the
//! transport. The scheduler hands a selected key and a request to the backend
//! and gets back either a response (any status) or a `TransportError`.
//! `HttpBackend` is the reqwest implementation used by the proxy service;
//! tests substitute scripted in-memory backends.

pub mod http;

pub use http::{HeaderInjection, HttpBackend};

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::HeaderMap;
use std::future::Future;
use std::pin::Pin;

/// Classification of a failed attempt, driving the rotation decision.
///
/// - RateLimited forces the key into backoff and rotates
/// - ServerError rotates without touching the key's state
/// - Transient (transport failure) forces backoff and rotates
/// - Fatal is surfaced immediately, no retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Upstream answered 429
    RateLimited,
    /// Upstream answered 5xx
    ServerError,
    /// Timeout, connection failure or a retryable transport message
    Transient,
    /// Validation failure or non-retryable status
    Fatal,
}

impl ErrorClassification {
    /// Whether the failure warrants one rotation retry on another key.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorClassification::Fatal)
    }
}

/// One outbound request, replayable across attempts.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub method: Method,
    /// Path and query appended to the backend base URL (e.g. `/chat/completions`)
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BackendRequest {
    /// A request with no extra headers.
    pub fn new(method: Method, path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

/// Response from the backend, whatever its status.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BackendResponse {
    /// Header name/value pairs whose values are valid visible ASCII.
    pub fn header_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
    }

    /// Body as lossy UTF-8, for error reporting.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Failure before any response was received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timeout: {0}")]
    Timeout(String),

    #[error("connection error: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Result of a single attempt against the backend.
pub type SendResult = std::result::Result<BackendResponse, TransportError>;

/// Abstraction over the transport that reaches the rate-limited backend.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Backend>`).
pub trait Backend: Send + Sync {
    /// Identifier for logging (e.g. "http")
    fn id(&self) -> &str;

    /// Send `request` authenticated with `key`. Non-2xx statuses are returned
    /// as responses, not errors.
    fn send<'a>(
        &'a self,
        key: &'a str,
        request: &'a BackendRequest,
    ) -> Pin<Box<dyn Future<Output = SendResult> + Send + 'a>>;
}
