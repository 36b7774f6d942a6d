//! Transport abstraction and the reqwest-backed HTTP implementation.
//!
//! The policy and sync engines only ever talk to a `Transport`, so tests can
//! substitute a scripted one and hosts can plug in their own client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::Value;
use tracing::{debug, warn};

use super::{ApiError, Request, Response};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Sends one request to the remote service.
///
/// Implementations return `Ok` only for 2xx answers; any other status, and
/// any failure to get an answer at all, is an `ApiError`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &Request) -> Result<Response, ApiError>;
}

/// HTTP transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    initial_backoff: Duration,
}

impl HttpTransport {
    /// Create a transport with the default request timeout
    pub fn new() -> Result<Self, ApiError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// Override the first rate-limit backoff delay; later retries double it.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    fn build_headers(request: &Request) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        for (name, value) in &request.headers {
            let name = header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ApiError::InvalidRequest(format!("header name {}: {}", name, e)))?;
            let value = header::HeaderValue::from_str(value)
                .map_err(|e| ApiError::InvalidRequest(format!("header value for {}: {}", name, e)))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status.as_u16(), &body))
        }
    }

    /// Read a successful response body.
    /// An empty or non-JSON body becomes `None`; the status alone decides success.
    async fn read_body(response: reqwest::Response, url: &str) -> Result<Option<Value>, ApiError> {
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str(&text) {
            Ok(body) => Ok(Some(body)),
            Err(e) => {
                warn!(url = %url, error = %e, "Successful response body is not JSON, ignoring it");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &Request) -> Result<Response, ApiError> {
        let headers = Self::build_headers(request)?;
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let mut builder = self
                .client
                .request(request.method.to_reqwest(), &request.url)
                .headers(headers.clone());
            if let Some(ref body) = request.body {
                builder = builder.json(body);
            }

            debug!(method = %request.method, url = %request.url, "Sending request");
            let response = builder.send().await?;
            let status = response.status().as_u16();

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let body = Self::read_body(response, &request.url).await?;
                    return Ok(Response::from_network(status, request.url.clone(), body));
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = %request.url, retry = retries, backoff_ms = backoff.as_millis() as u64, "Rate limited, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
}
