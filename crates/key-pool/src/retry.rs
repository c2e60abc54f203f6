//! Retry with key rotation around one logical request
//!
//! Attempt flow:
//! 1. Take a key with best-effort selection and send the request.
//! 2. Record usage from the response headers, whatever the status.
//! 3. 2xx returns. 429 forces the key into backoff and rotates. 5xx rotates
//!    without touching the key. Retryable transport failures force backoff and
//!    rotate. Anything else is surfaced immediately.
//! 4. Rotation takes a key with strict selection and retries once. A second
//!    retryable failure is surfaced as the final error.

use std::sync::Arc;

use backend::{Backend, BackendRequest, BackendResponse, ErrorClassification};
use common::key_hint;
use tracing::{debug, info, warn};

use crate::classify::{classify_status, classify_transport};
use crate::coordinator::RotationCoordinator;
use crate::error::{Error, Result};

/// Extra attempts allowed after the first one, each on a freshly selected key.
pub const MAX_ROTATIONS: u32 = 1;

/// Successful response with the metadata of the attempt that produced it.
#[derive(Debug)]
pub struct Completed {
    pub response: BackendResponse,
    /// Truncated prefix of the key that served the request
    pub key_hint: String,
    pub attempts: u32,
    pub rotated: bool,
}

/// Bounded retry policy over a shared coordinator and backend.
#[derive(Clone)]
pub struct RetryPolicy {
    coordinator: Arc<RotationCoordinator>,
    backend: Arc<dyn Backend>,
}

impl RetryPolicy {
    pub fn new(coordinator: Arc<RotationCoordinator>, backend: Arc<dyn Backend>) -> Self {
        Self {
            coordinator,
            backend,
        }
    }

    pub fn coordinator(&self) -> &Arc<RotationCoordinator> {
        &self.coordinator
    }

    /// Send `request`, rotating keys at most `MAX_ROTATIONS` times.
    pub async fn execute(&self, request: &BackendRequest) -> Result<Completed> {
        let mut key = self.coordinator.next_key(false).await.key;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let hint = key_hint(&key);
            debug!(key = %hint, attempt = attempts, backend = self.backend.id(), "sending request");

            let failure = match self.backend.send(&key, request).await {
                Ok(response) => {
                    self.coordinator
                        .record_usage(&key, response.header_pairs())
                        .await;

                    match classify_status(response.status) {
                        None => {
                            if attempts > 1 {
                                info!(key = %hint, attempts, "request succeeded after rotation");
                            }
                            return Ok(Completed {
                                response,
                                key_hint: hint,
                                attempts,
                                rotated: attempts > 1,
                            });
                        }
                        Some(ErrorClassification::RateLimited) => {
                            self.coordinator.mark_exhausted(&key).await;
                            Error::RateLimited {
                                key: hint,
                                status: response.status,
                                body: response.body_text(),
                                headers: response.headers,
                            }
                        }
                        Some(ErrorClassification::ServerError) => Error::ServerError {
                            key: hint,
                            status: response.status,
                            body: response.body_text(),
                            headers: response.headers,
                        },
                        Some(_) => {
                            return Err(Error::Rejected {
                                key: hint,
                                status: response.status,
                                body: response.body_text(),
                                headers: response.headers,
                            });
                        }
                    }
                }
                Err(source) => {
                    if !classify_transport(&source).is_retryable() {
                        return Err(Error::Fatal { key: hint, source });
                    }
                    self.coordinator.mark_exhausted(&key).await;
                    Error::Transport { key: hint, source }
                }
            };

            if attempts > MAX_ROTATIONS {
                warn!(error = %failure, attempts, "retryable failure after rotation, giving up");
                return Err(failure);
            }

            metrics::counter!("key_pool_rotations_total", "cause" => failure.kind()).increment(1);
            warn!(error = %failure, attempt = attempts, "retryable failure, rotating to next key");
            key = self.coordinator.next_key(true).await.key;
        }
    }
}
