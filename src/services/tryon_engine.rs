use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::models::tryon::{ImageUpload, TryOnJobCreated, TryOnJobStatus};
use crate::services::retry::{is_transient_status, RetryExecutor, RetryPolicy};
use crate::services::transport::{endpoint_url, HttpTransport};

const START_OPERATION: &str = "TryOn start";
const STATUS_OPERATION: &str = "TryOn status";

/// Virtual try-on rendering service.
#[async_trait]
pub trait TryOnEngineClient: Send + Sync {
    async fn start_try_on(
        &self,
        person: &ImageUpload,
        garment: &ImageUpload,
        cancel: &CancellationToken,
    ) -> Result<TryOnJobCreated, PipelineError>;

    async fn get_status(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TryOnJobStatus, PipelineError>;
}

/// HTTP adapter for the try-on engine.
pub struct HttpTryOnEngine {
    http: reqwest::Client,
    transport: Arc<dyn HttpTransport>,
    executor: RetryExecutor,
    base_url: String,
}

impl HttpTryOnEngine {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        let transport: Arc<dyn HttpTransport> = Arc::new(http.clone());
        Self::with_transport(http, transport, base_url, RetryPolicy::default())
    }

    pub fn with_transport(
        http: reqwest::Client,
        transport: Arc<dyn HttpTransport>,
        base_url: &str,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            http,
            executor: RetryExecutor::new(transport.clone(), policy),
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TryOnEngineClient for HttpTryOnEngine {
    /// Single attempt: a retried start could render the same try-on twice.
    async fn start_try_on(
        &self,
        person: &ImageUpload,
        garment: &ImageUpload,
        cancel: &CancellationToken,
    ) -> Result<TryOnJobCreated, PipelineError> {
        let part = |image: &ImageUpload| {
            Part::bytes(image.bytes.clone())
                .file_name(image.file_name.clone())
                .mime_str("application/octet-stream")
                .map_err(|e| PipelineError::upstream(START_OPERATION, e.to_string()))
        };
        let form = Form::new()
            .part("person_image", part(person)?)
            .part("garment_image", part(garment)?);

        let request = self
            .http
            .post(endpoint_url(START_OPERATION, &self.base_url, &["tryon"])?)
            .multipart(form)
            .build()
            .map_err(|e| PipelineError::upstream(START_OPERATION, e.to_string()))?;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            response = self.transport.send(request) => {
                response.map_err(|e| PipelineError::upstream(START_OPERATION, e.to_string()))?
            }
        };

        let status = response.status();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            body = response.bytes() => body,
        };

        if !status.is_success() {
            let detail = body
                .map(|b| String::from_utf8_lossy(&b).trim().to_string())
                .unwrap_or_default();
            let detail = if detail.is_empty() || is_transient_status(status) {
                format!("status code {}", status.as_u16())
            } else {
                detail
            };
            return Err(PipelineError::upstream(START_OPERATION, detail));
        }

        let body = body.map_err(|e| PipelineError::upstream(START_OPERATION, e.to_string()))?;
        let created: TryOnJobCreated = serde_json::from_slice(&body)
            .map_err(|e| PipelineError::upstream(START_OPERATION, format!("malformed response: {e}")))?;
        if created.job_id.trim().is_empty() {
            return Err(PipelineError::upstream(START_OPERATION, "response did not contain a job id"));
        }
        Ok(created)
    }

    async fn get_status(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TryOnJobStatus, PipelineError> {
        let url = endpoint_url(STATUS_OPERATION, &self.base_url, &["tryon", job_id])?;
        self.executor
            .execute(
                STATUS_OPERATION,
                cancel,
                || {
                    self.http
                        .get(url.clone())
                        .build()
                        .map_err(|e| PipelineError::upstream(STATUS_OPERATION, e.to_string()))
                },
                |response| {
                    response.json::<TryOnJobStatus>().map_err(|e| {
                        PipelineError::upstream(STATUS_OPERATION, format!("malformed response: {e}"))
                    })
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::transport::scripted::{raw_server, RawReply, ScriptedTransport};
    use std::time::Duration;

    fn engine(transport: Arc<ScriptedTransport>) -> HttpTryOnEngine {
        engine_at(transport, "http://tryon.test/")
    }

    fn engine_at(transport: Arc<ScriptedTransport>, base_url: &str) -> HttpTryOnEngine {
        HttpTryOnEngine::with_transport(
            reqwest::Client::new(),
            transport,
            base_url,
            RetryPolicy::default(),
        )
    }

    fn images() -> (ImageUpload, ImageUpload) {
        (
            ImageUpload::new(b"person".to_vec(), "me.jpg"),
            ImageUpload::new(b"garment".to_vec(), "hoodie.png"),
        )
    }

    #[tokio::test]
    async fn test_start_parses_job() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(200, r#"{"job_id":"t-9","status_url":"http://tryon.test/tryon/t-9"}"#),
        );
        let (person, garment) = images();
        let created = engine(transport.clone())
            .start_try_on(&person, &garment, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(created.job_id, "t-9");
        assert_eq!(transport.urls(), vec!["http://tryon.test/tryon"]);
    }

    #[tokio::test]
    async fn test_start_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new().reply(503, ""));
        let (person, garment) = images();
        let err = engine(transport.clone())
            .start_try_on(&person, &garment, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Upstream { .. }));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_retries_transient_errors() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(502, "")
                .reply(200, r#"{"status":"processing"}"#),
        );
        let status = engine(transport.clone())
            .get_status("t-9", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(status.status, "processing");
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_status_keeps_hostile_job_id_inside_tryon_path() {
        let transport = Arc::new(ScriptedTransport::new().reply(200, r#"{"status":"processing"}"#));
        engine_at(transport.clone(), "http://tryon.test/api")
            .get_status("../../admin/jobs?all=1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            transport.urls(),
            vec!["http://tryon.test/api/tryon/..%2F..%2Fadmin%2Fjobs%3Fall=1"]
        );
    }

    #[tokio::test]
    async fn test_status_rejects_dot_segment_job_id() {
        let transport = Arc::new(ScriptedTransport::new());
        let err = engine(transport.clone())
            .get_status("..", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Validation(_)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_start_cancelled_while_reading_body() {
        let server = raw_server(vec![RawReply {
            bytes: "HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n{\"job",
            stall: true,
        }])
        .await;
        let http = reqwest::Client::new();
        let engine = HttpTryOnEngine::with_transport(
            http.clone(),
            Arc::new(http),
            &server.base_url,
            RetryPolicy::default(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let (person, garment) = images();
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            engine.start_try_on(&person, &garment, &cancel),
        )
        .await
        .expect("cancellation should end the body read")
        .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(server.connections(), 1);
    }
}
