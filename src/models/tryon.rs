use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Garment generation request (text portion of the multipart form).
#[derive(Debug, Deserialize, Validate)]
pub struct GenerateGarmentRequest {
    #[garde(length(min = 1, max = 1000))]
    pub prompt: String,

    #[garde(length(max = 32))]
    pub garment_type: Option<String>,
}

/// Result of a successful prompt-to-garment generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerateGarmentResult {
    pub customization_job_id: Uuid,
    pub generation_request_id: String,
    pub generated_garment_url: String,
}

/// Shape returned by the preprocess endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessResult {
    pub preprocessed_image_url: String,
    pub customization_job_id: Uuid,
}

/// Try-on job accepted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TryOnJobCreated {
    pub job_id: String,
    #[serde(default)]
    pub status_url: Option<String>,
}

/// Status of a try-on job as reported by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TryOnJobStatus {
    pub status: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Terminal outcome carried by a [`TryOnJobStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryOnOutcome {
    Completed,
    Failed,
}

impl TryOnJobStatus {
    /// `completed`/`done` and `failed` are terminal; anything else is in flight.
    pub fn outcome(&self) -> Option<TryOnOutcome> {
        match self.status.trim().to_lowercase().as_str() {
            "completed" | "done" => Some(TryOnOutcome::Completed),
            "failed" => Some(TryOnOutcome::Failed),
            _ => None,
        }
    }

    pub fn failure_detail(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "Try-on job failed.".to_string())
    }
}

/// An image supplied by a caller, already read into memory.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

impl ImageUpload {
    pub fn new(bytes: impl Into<Vec<u8>>, file_name: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            file_name: file_name.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty() || self.file_name.trim().is_empty()
    }
}

/// Uniform response envelope returned by every customization endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(s: &str) -> TryOnJobStatus {
        TryOnJobStatus {
            status: s.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_outcome_is_case_insensitive() {
        assert_eq!(status("Completed").outcome(), Some(TryOnOutcome::Completed));
        assert_eq!(status("done").outcome(), Some(TryOnOutcome::Completed));
        assert_eq!(status("FAILED").outcome(), Some(TryOnOutcome::Failed));
        assert_eq!(status("processing").outcome(), None);
        assert_eq!(status("").outcome(), None);
    }

    #[test]
    fn test_failure_detail_prefers_error_then_message() {
        let mut s = status("failed");
        assert_eq!(s.failure_detail(), "Try-on job failed.");
        s.message = Some("queue dropped".into());
        assert_eq!(s.failure_detail(), "queue dropped");
        s.error = Some("bad pose".into());
        assert_eq!(s.failure_detail(), "bad pose");
    }

    #[test]
    fn test_status_parses_engine_payload() {
        let s: TryOnJobStatus =
            serde_json::from_str(r#"{"status":"completed","image_url":"https://r/1.png"}"#).unwrap();
        assert_eq!(s.image_url.as_deref(), Some("https://r/1.png"));
        assert!(s.error.is_none());
    }
}
