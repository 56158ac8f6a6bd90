use async_trait::async_trait;
use std::time::Duration;

use crate::error::PipelineError;

/// Per-request timeout applied to every outbound call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends a fully built request to an upstream service.
///
/// Implemented for [`reqwest::Client`]; tests substitute scripted transports.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response, TransportError>;
}

#[async_trait]
impl HttpTransport for reqwest::Client {
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response, TransportError> {
        self.execute(request).await.map_err(TransportError::from)
    }
}

/// Build the shared HTTP client used for upstream calls.
pub fn build_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(concat!("tryon-pipeline/", env!("CARGO_PKG_VERSION")))
        .timeout(REQUEST_TIMEOUT)
        .build()
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid request: {0}")]
    Invalid(String),
}

impl TransportError {
    /// Timeouts and network failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout(_) | TransportError::Network(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_builder() {
            TransportError::Invalid(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// `base` with each of `segments` appended as one percent-encoded path segment.
///
/// Identifiers taken from callers or upstream replies go through here so a
/// value like `../admin?x=1` stays inside the intended path.
pub fn endpoint_url(
    operation: &str,
    base: &str,
    segments: &[&str],
) -> Result<reqwest::Url, PipelineError> {
    if let Some(bad) = segments
        .iter()
        .find(|s| s.trim().is_empty() || **s == "." || **s == "..")
    {
        return Err(PipelineError::Validation(format!(
            "'{bad}' is not a valid identifier."
        )));
    }

    let mut url = reqwest::Url::parse(base)
        .map_err(|e| PipelineError::upstream(operation, format!("invalid base URL: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| PipelineError::upstream(operation, "base URL cannot carry a path"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
