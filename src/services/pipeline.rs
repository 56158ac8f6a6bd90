//! Customization pipeline: prompt -> generated garment -> virtual try-on.
//!
//! Each call runs inline on the caller's task. Every failure after a job
//! exists is written back as `Failed` with a readable `last_error` before it
//! is returned; cancellation is the exception and leaves the job at its last
//! persisted state.

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::job::{CustomizationJob, JobStatus};
use crate::models::tryon::{
    GenerateGarmentResult, ImageUpload, TryOnJobCreated, TryOnJobStatus, TryOnOutcome,
};
use crate::services::generation::GenerationClient;
use crate::services::job_store::JobStore;
use crate::services::tryon_engine::TryOnEngineClient;

const DEFAULT_GARMENT_FILE_NAME: &str = "generated-garment.png";
const JOB_NOT_FOUND: &str = "Customization job could not be found for this user.";

pub struct TryOnPipeline {
    generation: Arc<GenerationClient>,
    engine: Arc<dyn TryOnEngineClient>,
    jobs: Arc<dyn JobStore>,
}

impl TryOnPipeline {
    pub fn new(
        generation: Arc<GenerationClient>,
        engine: Arc<dyn TryOnEngineClient>,
        jobs: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            generation,
            engine,
            jobs,
        }
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    /// Generate a garment from `prompt` and a template image.
    ///
    /// Blocks until the generation service finishes or the poll budget runs out.
    pub async fn generate_garment_from_prompt(
        &self,
        user_id: &str,
        prompt: &str,
        garment: &ImageUpload,
        cancel: &CancellationToken,
    ) -> Result<GenerateGarmentResult, PipelineError> {
        require(user_id, "User id is required.")?;
        require(prompt, "Prompt is required.")?;
        if garment.is_empty() {
            return Err(PipelineError::Validation("Garment image is required.".to_string()));
        }

        let mut job = CustomizationJob::new(user_id, prompt.trim());
        self.jobs.create(&job).await?;
        metrics::counter!("customization_jobs_total").increment(1);
        info!(job_id = %job.id, user_id, "Created customization job");

        let started = Instant::now();
        match self.run_generation(&mut job, garment, cancel).await {
            Ok(result) => {
                metrics::histogram!("garment_generation_seconds")
                    .record(started.elapsed().as_secs_f64());
                Ok(result)
            }
            Err(PipelineError::Cancelled) => {
                info!(job_id = %job.id, status = %job.status, "Garment generation cancelled");
                Err(PipelineError::Cancelled)
            }
            Err(err) => {
                self.fail_job(&mut job, &err).await;
                Err(err)
            }
        }
    }

    async fn run_generation(
        &self,
        job: &mut CustomizationJob,
        garment: &ImageUpload,
        cancel: &CancellationToken,
    ) -> Result<GenerateGarmentResult, PipelineError> {
        let request_id = self
            .generation
            .submit(&job.prompt, &garment.bytes, &garment.file_name, cancel)
            .await?;
        job.record_generation_request(&request_id)?;
        self.jobs.update(job).await?;

        let artifact_url = self.generation.poll_until_done(&request_id, cancel).await?;
        job.mark_garment_generated(&artifact_url)?;
        self.jobs.update(job).await?;
        info!(job_id = %job.id, request_id = %request_id, "Garment generated");

        Ok(GenerateGarmentResult {
            customization_job_id: job.id,
            generation_request_id: request_id,
            generated_garment_url: artifact_url,
        })
    }

    /// Start a try-on of a previously generated garment on `person`.
    ///
    /// Jobs owned by another user are reported as not found, before any
    /// network call.
    pub async fn start_try_on(
        &self,
        user_id: &str,
        job_id: Uuid,
        person: &ImageUpload,
        cancel: &CancellationToken,
    ) -> Result<TryOnJobCreated, PipelineError> {
        require(user_id, "User id is required.")?;
        if person.is_empty() {
            return Err(PipelineError::Validation("Person image is required.".to_string()));
        }

        let mut job = self
            .jobs
            .get(job_id)
            .await?
            .filter(|job| job.is_owned_by(user_id))
            .ok_or_else(|| PipelineError::NotFound(JOB_NOT_FOUND.to_string()))?;

        let artifact_url = job
            .generated_artifact()
            .ok_or_else(|| {
                PipelineError::Precondition(
                    "No generated garment is associated with this customization job.".to_string(),
                )
            })?
            .to_string();

        if !job.status.can_transition_to(JobStatus::TryOnStarted) {
            return Err(PipelineError::Precondition(format!(
                "Customization job is already {} and cannot start a new try-on.",
                job.status
            )));
        }

        match self.run_try_on(&mut job, &artifact_url, person, cancel).await {
            Ok(created) => Ok(created),
            Err(PipelineError::Cancelled) => {
                info!(job_id = %job.id, status = %job.status, "Try-on start cancelled");
                Err(PipelineError::Cancelled)
            }
            Err(err) => {
                self.fail_job(&mut job, &err).await;
                Err(err)
            }
        }
    }

    async fn run_try_on(
        &self,
        job: &mut CustomizationJob,
        artifact_url: &str,
        person: &ImageUpload,
        cancel: &CancellationToken,
    ) -> Result<TryOnJobCreated, PipelineError> {
        let garment_bytes = self.generation.download_artifact(artifact_url, cancel).await?;
        let garment = ImageUpload::new(garment_bytes, file_name_from_url(artifact_url));

        let created = self.engine.start_try_on(person, &garment, cancel).await?;
        job.mark_try_on_started(&created.job_id, created.status_url.clone())?;
        self.jobs.update(job).await?;

        metrics::counter!("tryon_jobs_started").increment(1);
        info!(job_id = %job.id, try_on_job_id = %created.job_id, "Started try-on job");
        Ok(created)
    }

    /// Report the engine's view of a try-on job and reconcile the linked
    /// customization job when that view is terminal.
    ///
    /// Reconciliation is best effort: its failures are logged, never returned.
    pub async fn get_try_on_status(
        &self,
        try_on_job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TryOnJobStatus, PipelineError> {
        require(try_on_job_id, "Job id is required.")?;

        match self.engine.get_status(try_on_job_id, cancel).await {
            Ok(status) => {
                self.reconcile(try_on_job_id, &status).await;
                Ok(status)
            }
            Err(PipelineError::Cancelled) => Err(PipelineError::Cancelled),
            Err(err) => match self.jobs.find_by_try_on_job_id(try_on_job_id).await {
                Ok(Some(job)) if job.status.is_terminal() => {
                    info!(job_id = %job.id, try_on_job_id, error = %err, "Engine status unavailable, answering from stored job");
                    Ok(status_from_job(&job))
                }
                _ => Err(err),
            },
        }
    }

    async fn reconcile(&self, try_on_job_id: &str, status: &TryOnJobStatus) {
        let Some(outcome) = status.outcome() else {
            return;
        };

        let mut job = match self.jobs.find_by_try_on_job_id(try_on_job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::debug!(try_on_job_id, "No customization job linked to try-on job");
                return;
            }
            Err(e) => {
                warn!(try_on_job_id, error = %e, "Failed to look up customization job for try-on job");
                return;
            }
        };

        if job.status.is_terminal() {
            return;
        }

        let applied = match outcome {
            TryOnOutcome::Completed => job.mark_completed(status.image_url.clone()),
            TryOnOutcome::Failed => job.mark_failed(status.failure_detail()),
        };
        if let Err(e) = applied {
            warn!(job_id = %job.id, try_on_job_id, error = %e, "Cannot reconcile customization job");
            return;
        }

        match self.jobs.update(&job).await {
            Ok(()) => {
                metrics::counter!("tryon_jobs_reconciled").increment(1);
                info!(job_id = %job.id, try_on_job_id, status = %job.status, "Reconciled customization job");
            }
            Err(e) => {
                warn!(job_id = %job.id, try_on_job_id, error = %e, "Failed to update customization job for try-on job");
            }
        }
    }

    /// Load a job for its owner.
    pub async fn get_job(
        &self,
        user_id: &str,
        job_id: Uuid,
    ) -> Result<CustomizationJob, PipelineError> {
        self.jobs
            .get(job_id)
            .await?
            .filter(|job| job.is_owned_by(user_id))
            .ok_or_else(|| PipelineError::NotFound(JOB_NOT_FOUND.to_string()))
    }

    async fn fail_job(&self, job: &mut CustomizationJob, err: &PipelineError) {
        metrics::counter!("customization_jobs_failed").increment(1);
        warn!(job_id = %job.id, status = %job.status, error = %err, "Customization job failed");

        if let Err(e) = job.mark_failed(err.to_string()) {
            warn!(job_id = %job.id, error = %e, "Cannot mark customization job as failed");
            return;
        }
        if let Err(e) = self.jobs.update(job).await {
            warn!(job_id = %job.id, error = %e, "Failed to persist failed customization job");
        }
    }
}

fn require(value: &str, message: &str) -> Result<(), PipelineError> {
    if value.trim().is_empty() {
        return Err(PipelineError::Validation(message.to_string()));
    }
    Ok(())
}

/// Last path segment of `url`, or a default name.
fn file_name_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_GARMENT_FILE_NAME.to_string())
}

fn status_from_job(job: &CustomizationJob) -> TryOnJobStatus {
    let status = if job.status == JobStatus::Completed {
        "completed"
    } else {
        "failed"
    };
    TryOnJobStatus {
        status: status.to_string(),
        image_url: job.try_on_result_url.clone(),
        image_base64: None,
        error: job.last_error.clone(),
        message: Some("Reported from the stored customization job.".to_string()),
    }
}
