//! Timeout-bounded HTTP requests
//!
//! Every upstream call in the crate goes through [`TimedFetch`], which guarantees
//! that a request either completes or fails within its timeout. Retry policy is
//! left to callers (see `health::HealthProbe`).

use std::time::Duration;

use reqwest::{Client, Method};
use thiserror::Error;
use tracing::{debug, warn};

/// Default timeout for data fetches
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of any upstream fetch
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors that can occur when talking to an upstream API
///
/// All variants are recoverable: clients convert them into stale cache values,
/// defaults, or an `Err` handed to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The request did not complete within its timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The upstream answered with a non-2xx status
    #[error("upstream returned HTTP {0}")]
    UpstreamStatus(u16),

    /// The response body could not be interpreted
    #[error("failed to parse upstream response: {0}")]
    ParseFailure(String),

    /// Connection, DNS or transport failure
    #[error("upstream unreachable: {0}")]
    NetworkUnreachable(String),
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::ParseFailure(err.to_string())
    }
}

impl FetchError {
    fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(timeout)
        } else if err.is_decode() || err.is_body() {
            FetchError::ParseFailure(err.to_string())
        } else {
            FetchError::NetworkUnreachable(err.to_string())
        }
    }
}

/// Describes a single HTTP request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    json_body: Option<serde_json::Value>,
}

impl FetchRequest {
    /// A GET request for the given URL
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            json_body: None,
        }
    }

    /// A POST request carrying a JSON body
    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            json_body: Some(body),
        }
    }

    /// Adds a request header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Status and body of a completed exchange
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx response into `FetchError::UpstreamStatus`
    pub fn error_for_status(self) -> FetchResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(FetchError::UpstreamStatus(self.status))
        }
    }
}

/// HTTP client wrapper that enforces a timeout on every request
#[derive(Debug, Clone)]
pub struct TimedFetch {
    client: Client,
}

impl Default for TimedFetch {
    fn default() -> Self {
        Self::new()
    }
}

impl TimedFetch {
    /// Create a new TimedFetch with default settings
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Create a new TimedFetch with a custom HTTP client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Issues the request and waits at most `timeout` for status and body
    ///
    /// When the timer fires first the in-flight request is dropped, which
    /// aborts it. A non-2xx status is still `Ok`; callers decide how to treat it.
    pub async fn fetch(&self, request: &FetchRequest, timeout: Duration) -> FetchResult<RawResponse> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.json_body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, url = %redact_url(&request.url), ?timeout, "Sending request");

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>(RawResponse { status, body })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(raw)) => {
                debug!(status = raw.status, bytes = raw.body.len(), "Received response");
                Ok(raw)
            }
            Ok(Err(err)) => {
                let err = FetchError::from_transport(err, timeout);
                warn!(url = %redact_url(&request.url), error = %err, "Request failed");
                Err(err)
            }
            Err(_) => {
                warn!(url = %redact_url(&request.url), ?timeout, "Request timed out");
                Err(FetchError::Timeout(timeout))
            }
        }
    }

    /// Fetches, rejects non-2xx statuses and parses the body
    pub async fn fetch_parsed<T>(
        &self,
        request: &FetchRequest,
        timeout: Duration,
        parse: fn(&str) -> FetchResult<T>,
    ) -> FetchResult<T> {
        let raw = self.fetch(request, timeout).await?.error_for_status()?;
        parse(&raw.body)
    }
}

/// Strips query strings from URLs before logging so API keys never reach the logs
pub fn redact_url(url: &str) -> &str {
    let cut = url.find(|c| c == '?' || c == '&').unwrap_or(url.len());
    &url[..cut]
}
