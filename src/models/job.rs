use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::error::PipelineError;

/// Stage of a customization job.
///
/// Jobs only move forward through
/// `PendingGeneration -> GarmentGenerated -> TryOnStarted -> Completed`,
/// or to `Failed`, which is absorbing.
///
/// `generated_garment_url` is set from `GarmentGenerated` onwards and
/// `try_on_job_id` from `TryOnStarted` onwards. A `Failed` job keeps whichever
/// of the two it already had, so the stage it failed at stays visible.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    PendingGeneration,
    GarmentGenerated,
    TryOnStarted,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a job in `self` may be rewritten with status `next`.
    ///
    /// `TryOnStarted -> TryOnStarted` is allowed so a garment can be tried on
    /// again with a different person image; it replaces the try-on linkage.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Completed, _) | (Failed, _) => false,
            (_, Failed) => true,
            (PendingGeneration, GarmentGenerated) => true,
            (GarmentGenerated, TryOnStarted) => true,
            (TryOnStarted, TryOnStarted) => true,
            (TryOnStarted, Completed) => true,
            _ => false,
        }
    }
}

/// Durable record of one prompt-to-try-on run for one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomizationJob {
    pub id: Uuid,
    pub user_id: String,
    pub prompt: String,
    pub generation_request_id: Option<String>,
    pub generated_garment_url: Option<String>,
    pub try_on_job_id: Option<String>,
    pub try_on_status_url: Option<String>,
    pub try_on_result_url: Option<String>,
    pub status: JobStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CustomizationJob {
    pub fn new(user_id: &str, prompt: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            prompt: prompt.to_string(),
            generation_request_id: None,
            generated_garment_url: None,
            try_on_job_id: None,
            try_on_status_url: None,
            try_on_result_url: None,
            status: JobStatus::PendingGeneration,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// Generated artifact URL, if generation produced a non-empty one.
    pub fn generated_artifact(&self) -> Option<&str> {
        self.generated_garment_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }

    /// Remember the generation service's handle. Does not change the status.
    pub fn record_generation_request(&mut self, request_id: &str) -> Result<(), PipelineError> {
        if self.status != JobStatus::PendingGeneration {
            return Err(self.invalid(JobStatus::PendingGeneration));
        }
        self.generation_request_id = Some(request_id.to_string());
        self.touch();
        Ok(())
    }

    pub fn mark_garment_generated(&mut self, artifact_url: &str) -> Result<(), PipelineError> {
        require_non_empty(artifact_url, "generated artifact url")?;
        self.advance(JobStatus::GarmentGenerated)?;
        self.generated_garment_url = Some(artifact_url.to_string());
        self.last_error = None;
        Ok(())
    }

    pub fn mark_try_on_started(
        &mut self,
        try_on_job_id: &str,
        status_url: Option<String>,
    ) -> Result<(), PipelineError> {
        require_non_empty(try_on_job_id, "try-on job id")?;
        if self.generated_artifact().is_none() {
            return Err(PipelineError::Precondition(
                "No generated garment is associated with this customization job.".to_string(),
            ));
        }
        self.advance(JobStatus::TryOnStarted)?;
        self.try_on_job_id = Some(try_on_job_id.to_string());
        self.try_on_status_url = status_url;
        self.try_on_result_url = None;
        self.last_error = None;
        Ok(())
    }

    /// Keeps the previous result URL when the engine reports none.
    pub fn mark_completed(&mut self, result_url: Option<String>) -> Result<(), PipelineError> {
        self.advance(JobStatus::Completed)?;
        if let Some(url) = result_url.filter(|u| !u.trim().is_empty()) {
            self.try_on_result_url = Some(url);
        }
        self.last_error = None;
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), PipelineError> {
        self.advance(JobStatus::Failed)?;
        let error = error.into();
        self.last_error = Some(if error.trim().is_empty() {
            "Customization job failed.".to_string()
        } else {
            error
        });
        Ok(())
    }

    fn advance(&mut self, next: JobStatus) -> Result<(), PipelineError> {
        if !self.status.can_transition_to(next) {
            return Err(self.invalid(next));
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    fn invalid(&self, to: JobStatus) -> PipelineError {
        PipelineError::InvalidTransition {
            job_id: self.id,
            from: self.status,
            to,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn require_non_empty(value: &str, what: &str) -> Result<(), PipelineError> {
    if value.trim().is_empty() {
        return Err(PipelineError::Validation(format!("{what} must not be empty")));
    }
    Ok(())
}
