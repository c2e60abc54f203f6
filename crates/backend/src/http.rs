//! HTTP backend built on reqwest.
//!
//! Joins the configured base URL with each request path, authenticates with
//! `Authorization: Bearer <key>` and injects configured static headers. The
//! response is returned whatever its status; only failures to obtain a
//! response become `TransportError`s.

use crate::{Backend, BackendRequest, BackendResponse, SendResult, TransportError};
use common::key_hint;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Header injection rule (name + value pair from config).
#[derive(Debug, Clone)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

/// Backend that reaches the upstream over HTTP.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    headers: Vec<HeaderInjection>,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        headers: Vec<HeaderInjection>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            headers,
            timeout,
        }
    }

    /// Absolute URL for a request path.
    pub fn url_for(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path.is_empty() {
            base.to_string()
        } else if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    /// Headers for one attempt: request headers, configured injections, then
    /// the bearer token for `key`. Injections never override authorization.
    pub fn build_headers(&self, key: &str, request_headers: &HeaderMap) -> HeaderMap {
        let mut headers = request_headers.clone();
        for injection in &self.headers {
            let name = match HeaderName::from_str(&injection.name) {
                Ok(n) => n,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header name");
                    continue;
                }
            };
            if name == AUTHORIZATION {
                warn!(header = %injection.name, "refusing to overwrite authorization header");
                continue;
            }
            let value = match HeaderValue::from_str(&injection.value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header value");
                    continue;
                }
            };
            headers.insert(name, value);
        }

        match HeaderValue::from_str(&format!("Bearer {key}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => {
                warn!(key = %key_hint(key), "key is not a valid header value, sending without authorization");
                headers.remove(AUTHORIZATION);
            }
        }
        headers
    }
}

/// Map a reqwest failure to the transport taxonomy.
fn classify_reqwest_error(error: &reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

impl Backend for HttpBackend {
    fn id(&self) -> &str {
        "http"
    }

    fn send<'a>(
        &'a self,
        key: &'a str,
        request: &'a BackendRequest,
    ) -> Pin<Box<dyn Future<Output = SendResult> + Send + 'a>> {
        Box::pin(async move {
            let url = self.url_for(&request.path);
            debug!(key = %key_hint(key), method = %request.method, %url, "sending upstream request");

            let response = self
                .client
                .request(request.method.clone(), &url)
                .headers(self.build_headers(key, &request.headers))
                .timeout(self.timeout)
                .body(request.body.clone())
                .send()
                .await
                .map_err(|e| classify_reqwest_error(&e))?;

            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| classify_reqwest_error(&e))?;

            Ok(BackendResponse {
                status,
                headers,
                body,
            })
        })
    }
}
