use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::GenerationSettings;
use crate::error::PipelineError;
use crate::services::retry::{RetryExecutor, RetryPolicy, UpstreamResponse};
use crate::services::transport::{endpoint_url, HttpTransport};

const SUBMIT_OPERATION: &str = "DeApi img2img";
const STATUS_OPERATION: &str = "DeApi request-status";
const DOWNLOAD_OPERATION: &str = "Download generated garment";

/// Total time a generation request may take before polling gives up.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(120);

/// Polls are 2s apart for the first 10s, then 5s apart.
const FAST_POLL_PHASE: Duration = Duration::from_secs(10);
const FAST_POLL_INTERVAL: Duration = Duration::from_secs(2);
const SLOW_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Deserialize)]
struct SubmitData {
    request_id: Option<String>,
}

#[derive(Deserialize)]
struct StatusData {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    result_url: Option<String>,
}

/// Client for the image generation service (img2img edit + status polling).
pub struct GenerationClient {
    http: reqwest::Client,
    executor: RetryExecutor,
    settings: GenerationSettings,
    poll_timeout: Duration,
}

impl GenerationClient {
    /// Use `http` both to build and to send requests.
    pub fn new(http: reqwest::Client, settings: GenerationSettings) -> Self {
        let transport: Arc<dyn HttpTransport> = Arc::new(http.clone());
        Self::with_transport(http, transport, settings, RetryPolicy::default())
    }

    pub fn with_transport(
        http: reqwest::Client,
        transport: Arc<dyn HttpTransport>,
        settings: GenerationSettings,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            http,
            executor: RetryExecutor::new(transport, policy),
            settings,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Upload a garment image with an edit prompt; returns the request id.
    ///
    /// An accepted call without a `request_id` is not retried, since a retry
    /// would start a second generation.
    pub async fn submit(
        &self,
        prompt: &str,
        image: &[u8],
        file_name: &str,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let url = endpoint_url(SUBMIT_OPERATION, &self.settings.base_url, &["client", "img2img"])?;

        let request_id = self
            .executor
            .execute(
                SUBMIT_OPERATION,
                cancel,
                || {
                    let form = Form::new()
                        .text("prompt", prompt.to_string())
                        .text("model", self.settings.model.clone())
                        .text("steps", self.settings.steps.to_string())
                        .text("seed", self.settings.seed.to_string())
                        .part(
                            "image",
                            Part::bytes(image.to_vec())
                                .file_name(file_name.to_string())
                                .mime_str("application/octet-stream")
                                .map_err(|e| PipelineError::upstream(SUBMIT_OPERATION, e.to_string()))?,
                        );
                    self.http
                        .post(url.clone())
                        .bearer_auth(&self.settings.api_key)
                        .header(reqwest::header::ACCEPT, "application/json")
                        .multipart(form)
                        .build()
                        .map_err(|e| PipelineError::upstream(SUBMIT_OPERATION, e.to_string()))
                },
                |response| {
                    let body = read_body(SUBMIT_OPERATION, &response)?;
                    parse_request_id(&body)
                },
            )
            .await?;

        tracing::info!(request_id = %request_id, "Started generation request");
        Ok(request_id)
    }

    /// Poll the status endpoint until the request is done or failed, using
    /// the client's configured poll timeout.
    pub async fn poll_until_done(
        &self,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        self.poll_until_done_within(request_id, self.poll_timeout, cancel)
            .await
    }

    /// Poll until `done` (returns the result URL), `failed`, or `timeout`.
    ///
    /// Cancellation only stops polling; it does not mark anything failed.
    pub async fn poll_until_done_within(
        &self,
        request_id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let url = endpoint_url(
            STATUS_OPERATION,
            &self.settings.base_url,
            &["client", "request-status", request_id],
        )?;
        let start = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let elapsed = start.elapsed();
            if elapsed > timeout {
                tracing::warn!(request_id, elapsed_secs = elapsed.as_secs(), "Generation request timed out");
                return Err(PipelineError::Timeout(
                    "Generation request is taking longer than expected.".to_string(),
                ));
            }

            let status = self
                .executor
                .execute(
                    STATUS_OPERATION,
                    cancel,
                    || {
                        self.http
                            .get(url.clone())
                            .bearer_auth(&self.settings.api_key)
                            .header(reqwest::header::ACCEPT, "application/json")
                            .build()
                            .map_err(|e| PipelineError::upstream(STATUS_OPERATION, e.to_string()))
                    },
                    |response| {
                        let body = read_body(STATUS_OPERATION, &response)?;
                        parse_status(&body)
                    },
                )
                .await?;

            match status.status.as_deref().map(str::to_lowercase).as_deref() {
                Some("done") => {
                    let result_url = status
                        .result_url
                        .filter(|u| !u.trim().is_empty())
                        .ok_or_else(|| {
                            PipelineError::upstream(
                                STATUS_OPERATION,
                                "reported 'done' but no result_url was provided",
                            )
                        })?;
                    tracing::info!(request_id, "Generation request completed");
                    return Ok(result_url);
                }
                Some("failed") => {
                    return Err(PipelineError::upstream(
                        STATUS_OPERATION,
                        "the generation service reported the request as failed",
                    ));
                }
                other => {
                    let delay = if elapsed < FAST_POLL_PHASE {
                        FAST_POLL_INTERVAL
                    } else {
                        SLOW_POLL_INTERVAL
                    };
                    tracing::debug!(request_id, status = ?other, delay_ms = delay.as_millis() as u64, "Generation still running");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Fetch the generated artifact bytes.
    pub async fn download_artifact(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, PipelineError> {
        self.executor
            .execute(
                DOWNLOAD_OPERATION,
                cancel,
                || {
                    self.http
                        .get(url)
                        .build()
                        .map_err(|e| PipelineError::upstream(DOWNLOAD_OPERATION, e.to_string()))
                },
                |response| {
                    if response.body.is_empty() {
                        return Err(PipelineError::upstream(DOWNLOAD_OPERATION, "artifact is empty"));
                    }
                    Ok(response.body)
                },
            )
            .await
    }
}

fn read_body(operation: &str, response: &UpstreamResponse) -> Result<String, PipelineError> {
    let body = response.text();
    if body.trim().is_empty() {
        return Err(PipelineError::upstream(operation, "empty response body"));
    }
    Ok(body)
}

fn parse_request_id(body: &str) -> Result<String, PipelineError> {
    let envelope: Envelope<SubmitData> = serde_json::from_str(body)
        .map_err(|e| PipelineError::upstream(SUBMIT_OPERATION, format!("malformed response: {e}")))?;
    let data = envelope
        .data
        .ok_or_else(|| PipelineError::upstream(SUBMIT_OPERATION, "response did not contain 'data'"))?;
    data.request_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| PipelineError::upstream(SUBMIT_OPERATION, "response did not contain 'request_id'"))
}

fn parse_status(body: &str) -> Result<StatusData, PipelineError> {
    let envelope: Envelope<StatusData> = serde_json::from_str(body)
        .map_err(|e| PipelineError::upstream(STATUS_OPERATION, format!("malformed response: {e}")))?;
    envelope
        .data
        .ok_or_else(|| PipelineError::upstream(STATUS_OPERATION, "response did not contain 'data'"))
}
