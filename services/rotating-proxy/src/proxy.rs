//! HTTP proxy logic
//!
//! Receives inbound requests, strips hop-by-hop headers, and forwards them
//! through the key rotation retry policy. Upstream responses, including the
//! final error status after rotation, are returned verbatim; failures with no
//! upstream response become JSON errors.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use backend::BackendRequest;
use key_pool::RetryPolicy;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Request headers rebuilt by the HTTP client for each attempt.
const CLIENT_MANAGED_HEADERS: &[&str] = &["host", "content-length"];

/// Largest inbound body accepted (10 MiB).
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared state passed to the proxy handler via axum State extractor
#[derive(Clone)]
pub struct ProxyState {
    pub policy: RetryPolicy,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
}

impl ProxyState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// JSON error response: {"error":{"type":"...","message":"...","request_id":"req_..."}}
fn error_response(status: StatusCode, kind: &str, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": kind,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Forward an inbound request upstream, rotating keys on rate limits and
/// transient failures.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    let started = Instant::now();
    state.requests_total.fetch_add(1, Ordering::Relaxed);

    let method = request.method().clone();
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let headers = forwardable_headers(request.headers());

    let response = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => {
            let outbound = BackendRequest {
                method: method.clone(),
                path,
                headers,
                body,
            };
            forward(state, &outbound, &request_id).await
        }
        Err(e) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "failed to read request body");
            error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &format!("invalid request body: {e}"),
                &request_id,
            )
        }
    };

    crate::metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn forward(state: &ProxyState, request: &BackendRequest, request_id: &str) -> Response {
    match state.policy.execute(request).await {
        Ok(done) => {
            info!(
                key = %done.key_hint,
                status = done.response.status,
                attempts = done.attempts,
                rotated = done.rotated,
                "request completed"
            );
            let status = StatusCode::from_u16(done.response.status).unwrap_or(StatusCode::OK);
            upstream_response(
                status,
                &done.response.headers,
                axum::body::Body::from(done.response.body),
                request_id,
            )
        }
        Err(err) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_upstream_error(err.kind());

            if let (Some((status, body)), Some(headers)) =
                (err.upstream_response(), err.upstream_headers())
            {
                warn!(error = %err, "upstream request failed");
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                return upstream_response(
                    status,
                    headers,
                    axum::body::Body::from(body.to_string()),
                    request_id,
                );
            }

            error!(error = %err, "upstream request failed");
            let status = if err.is_timeout() {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            };
            error_response(status, err.kind(), &err.to_string(), request_id)
        }
    }
}

/// Relay an upstream response with its non-hop-by-hop headers.
fn upstream_response(
    status: StatusCode,
    headers: &HeaderMap,
    body: axum::body::Body,
    request_id: &str,
) -> Response {
    let mut response = Response::builder().status(status);
    for (name, value) in headers {
        if !is_hop_by_hop(name.as_str()) && *name != axum::http::header::CONTENT_LENGTH {
            response = response.header(name, value);
        }
    }
    response.body(body).unwrap_or_else(|e| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "proxy_error",
            &format!("response build error: {e}"),
            request_id,
        )
    })
}

/// Inbound headers minus hop-by-hop and client-managed ones.
fn forwardable_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound {
        let name_str = name.as_str();
        if !is_hop_by_hop(name_str) && !CLIENT_MANAGED_HEADERS.contains(&name_str) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
