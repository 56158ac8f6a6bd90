//! Bounded retry with exponential backoff for outbound HTTP calls.
//!
//! A call is retried when the upstream answers 429 or 5xx, or when the
//! transport reports a network failure or timeout, including while the
//! response body is being read. Anything else fails at once. Caller
//! cancellation aborts the current attempt and any pending backoff sleep.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::services::transport::{HttpTransport, TransportError};

/// Retries after the first attempt (3 attempts in total).
pub const DEFAULT_MAX_RETRIES: u32 = 2;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the retry that follows the zero-based `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// A successful upstream reply whose body has been read in full.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Runs request factories through an [`HttpTransport`] under a [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryExecutor {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send the request produced by `build` until a successful response has
    /// been read in full, then hand it to `map`.
    ///
    /// `build` is called once per attempt because request bodies (multipart
    /// forms in particular) cannot be replayed. Errors returned by `map` are
    /// final: the upstream already accepted the call.
    pub async fn execute<T, B, M>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut build: B,
        mut map: M,
    ) -> Result<T, PipelineError>
    where
        B: FnMut() -> Result<reqwest::Request, PipelineError>,
        M: FnMut(UpstreamResponse) -> Result<T, PipelineError>,
    {
        let total_attempts = self.policy.max_retries + 1;
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let request = build()?;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                outcome = self.transport.send(request) => outcome,
            };

            let failure = match outcome {
                Ok(response) if response.status().is_success() => {
                    let status = response.status();
                    let body = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                        body = response.bytes() => body.map_err(TransportError::from),
                    };
                    match body {
                        Ok(body) => {
                            if attempt > 0 {
                                debug!(operation, attempts = attempt + 1, "Upstream call succeeded after retry");
                            }
                            return map(UpstreamResponse {
                                status,
                                body: body.to_vec(),
                            });
                        }
                        Err(err) if err.is_transient() => format!("reading response body: {err}"),
                        Err(err) => return Err(PipelineError::upstream(operation, err.to_string())),
                    }
                }
                Ok(response) => {
                    let status = response.status();
                    if !is_transient_status(status) {
                        return Err(PipelineError::upstream(
                            operation,
                            format!("status code {}", status.as_u16()),
                        ));
                    }
                    format!("status code {}", status.as_u16())
                }
                Err(err) if err.is_transient() => err.to_string(),
                Err(err) => return Err(PipelineError::upstream(operation, err.to_string())),
            };

            if attempt >= self.policy.max_retries {
                warn!(operation, attempts = total_attempts, cause = %failure, "Upstream call exhausted retries");
                return Err(PipelineError::upstream(
                    operation,
                    format!("unable to complete after {total_attempts} attempts ({failure})"),
                ));
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                operation,
                cause = %failure,
                delay_ms = delay.as_millis() as u64,
                attempt = attempt + 1,
                total_attempts,
                "Transient upstream failure, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::transport::scripted::ScriptedTransport;

    fn executor(transport: Arc<ScriptedTransport>) -> RetryExecutor {
        RetryExecutor::new(transport, RetryPolicy::default())
    }

    fn get_request() -> Result<reqwest::Request, PipelineError> {
        reqwest::Client::new()
            .get("http://upstream.test/status")
            .build()
            .map_err(|e| PipelineError::upstream("test", e.to_string()))
    }

    fn read_text(response: UpstreamResponse) -> Result<String, PipelineError> {
        Ok(response.text())
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
    }

    #[test]
    fn test_transient_status_classification() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_503_then_succeeds() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(503, "")
                .reply(503, "")
                .reply(200, "ok"),
        );
        let cancel = CancellationToken::new();

        let body = executor(transport.clone())
            .execute("status", &cancel, get_request, read_text)
            .await
            .unwrap();

        assert_eq!(body, "ok");
        assert_eq!(transport.call_count(), 3);
        let times = transport.call_times();
        assert_eq!(times[1] - times[0], Duration::from_millis(500));
        assert_eq!(times[2] - times[1], Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_three_attempts() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(500, "")
                .fail(TransportError::Network("connection reset".into()))
                .reply(429, ""),
        );
        let cancel = CancellationToken::new();

        let err = executor(transport.clone())
            .execute("DeApi img2img", &cancel, get_request, read_text)
            .await
            .unwrap_err();

        assert_eq!(transport.call_count(), 3);
        match err {
            PipelineError::Upstream { operation, detail } => {
                assert_eq!(operation, "DeApi img2img");
                assert!(detail.contains("429"), "detail was {detail}");
            }
            other => panic!("expected upstream failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new().reply(400, "bad prompt"));
        let cancel = CancellationToken::new();

        let err = executor(transport.clone())
            .execute("status", &cancel, get_request, read_text)
            .await
            .unwrap_err();

        assert_eq!(transport.call_count(), 1);
        assert!(matches!(err, PipelineError::Upstream { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .fail(TransportError::Timeout("30s elapsed".into()))
                .reply(200, "late"),
        );
        let cancel = CancellationToken::new();

        let body = executor(transport.clone())
            .execute("status", &cancel, get_request, read_text)
            .await
            .unwrap();

        assert_eq!(body, "late");
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_map_error_is_final() {
        let transport = Arc::new(ScriptedTransport::new().reply(200, "{}"));
        let cancel = CancellationToken::new();

        let err = executor(transport.clone())
            .execute("submit", &cancel, get_request, |_resp| {
                Err::<(), _>(PipelineError::upstream("submit", "missing request_id"))
            })
            .await
            .unwrap_err();

        assert_eq!(transport.call_count(), 1);
        assert!(matches!(err, PipelineError::Upstream { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_backoff() {
        let transport = Arc::new(ScriptedTransport::new().reply(503, "").reply(200, "never"));
        let cancel = CancellationToken::new();
        let exec = executor(transport.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = exec
            .execute("status", &cancel, get_request, read_text)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_sends_nothing() {
        let transport = Arc::new(ScriptedTransport::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = executor(transport.clone())
            .execute("status", &cancel, get_request, read_text)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(transport.call_count(), 0);
    }
}
