use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::models::job::JobStatus;
use crate::models::tryon::ApiResponse;

/// Failure taxonomy shared by every stage of the customization pipeline.
///
/// Transient upstream failures never appear here: the retry executor absorbs
/// them and only reports [`PipelineError::Upstream`] once retries run out.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),

    #[error("You are sending too many try-on requests. Please wait a moment and try again.")]
    RateLimitExceeded,

    #[error("{operation} failed: {detail}")]
    Upstream { operation: String, detail: String },

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Precondition(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Operation cancelled by caller")]
    Cancelled,

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    pub fn upstream(operation: &str, detail: impl Into<String>) -> Self {
        Self::Upstream {
            operation: operation.to_string(),
            detail: detail.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Validation(_) | PipelineError::Precondition(_) => StatusCode::BAD_REQUEST,
            PipelineError::InvalidTransition { .. } => StatusCode::CONFLICT,
            PipelineError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            PipelineError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            PipelineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            // 499: client closed request
            PipelineError::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
            }
            PipelineError::Configuration(_) | PipelineError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
            "The request could not be completed. Please try again later.".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ApiResponse::<()>::failure(message))).into_response()
    }
}

/// Errors raised by a [`crate::services::job_store::JobStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {0} does not exist")]
    Missing(Uuid),

    #[error("Job {0} cannot change owner")]
    OwnerChanged(Uuid),

    #[error("Unknown job status stored: {0}")]
    UnknownStatus(String),

    #[error("Job store lock poisoned")]
    Poisoned,
}
