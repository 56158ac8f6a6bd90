use axum::extract::{Multipart, Path, State};
use axum::Json;
use garde::Validate;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::PipelineError;
use crate::models::job::CustomizationJob;
use crate::models::tryon::{
    ApiResponse, GenerateGarmentRequest, GenerateGarmentResult, ImageUpload, PreprocessResult,
    TryOnJobCreated, TryOnJobStatus,
};
use crate::routes::auth::AuthUser;
use crate::services::garments::validate_image;

/// Reject the request if the caller is over their per-window budget.
fn enforce_rate_limit(state: &AppState, user: &AuthUser) -> Result<(), PipelineError> {
    if state.rate_limiter.check(&user.user_id).is_allowed() {
        Ok(())
    } else {
        Err(PipelineError::RateLimitExceeded)
    }
}

/// Token cancelled when the handler future is dropped (client went away).
fn request_cancellation() -> (CancellationToken, tokio_util::sync::DropGuard) {
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    (token, guard)
}

fn bad_multipart(err: axum::extract::multipart::MultipartError) -> PipelineError {
    PipelineError::Validation(format!("Invalid multipart body: {err}"))
}

async fn read_upload(
    field: axum::extract::multipart::Field<'_>,
) -> Result<Option<ImageUpload>, PipelineError> {
    let file_name = field.file_name().unwrap_or_default().to_string();
    let bytes = field.bytes().await.map_err(bad_multipart)?;
    if bytes.is_empty() {
        return Ok(None);
    }
    let upload = ImageUpload::new(bytes.to_vec(), file_name);
    validate_image(&upload)?;
    Ok(Some(upload))
}

async fn generate(
    state: &AppState,
    user: &AuthUser,
    mut multipart: Multipart,
) -> Result<GenerateGarmentResult, PipelineError> {
    enforce_rate_limit(state, user)?;

    let mut prompt = String::new();
    let mut garment_type: Option<String> = None;
    let mut upload: Option<ImageUpload> = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "prompt" => prompt = field.text().await.map_err(bad_multipart)?,
            "garmentType" | "garment_type" => {
                garment_type = Some(field.text().await.map_err(bad_multipart)?)
            }
            "file" | "image" => upload = read_upload(field).await?,
            _ => {}
        }
    }

    let request = GenerateGarmentRequest {
        prompt: prompt.trim().to_string(),
        garment_type,
    };
    if request.prompt.is_empty() {
        return Err(PipelineError::Validation("Prompt is required.".to_string()));
    }
    request
        .validate()
        .map_err(|report| PipelineError::Validation(report.to_string()))?;

    let garment = match upload {
        Some(upload) => upload,
        None => {
            state
                .default_garments
                .load(request.garment_type.as_deref())
                .await?
        }
    };

    let (cancel, _guard) = request_cancellation();
    state
        .pipeline
        .generate_garment_from_prompt(&user.user_id, &request.prompt, &garment, &cancel)
        .await
}

/// POST /api/customization/generate: generate a garment from a prompt.
pub async fn generate_garment(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<Json<ApiResponse<GenerateGarmentResult>>, PipelineError> {
    let result = generate(&state, &user, multipart).await?;
    Ok(Json(ApiResponse::success(result, "Garment generated successfully.")))
}

/// POST /api/customization/preprocess: generate and return only the image URL.
pub async fn preprocess_garment(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<Json<ApiResponse<PreprocessResult>>, PipelineError> {
    let result = generate(&state, &user, multipart).await?;
    Ok(Json(ApiResponse::success(
        PreprocessResult {
            preprocessed_image_url: result.generated_garment_url,
            customization_job_id: result.customization_job_id,
        },
        "Garment preprocessed successfully.",
    )))
}

/// POST /api/customization/tryon: start a try-on for a generated garment.
pub async fn start_try_on(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<TryOnJobCreated>>, PipelineError> {
    enforce_rate_limit(&state, &user)?;

    let mut person: Option<ImageUpload> = None;
    let mut job_id: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "personImage" | "person_image" => person = read_upload(field).await?,
            "customizationJobId" | "customization_job_id" => {
                job_id = Some(field.text().await.map_err(bad_multipart)?)
            }
            _ => {}
        }
    }

    let person = person
        .ok_or_else(|| PipelineError::Validation("Person image file is required.".to_string()))?;
    let job_id = job_id
        .and_then(|id| Uuid::parse_str(id.trim()).ok())
        .ok_or_else(|| {
            PipelineError::Validation("A valid customization job id is required.".to_string())
        })?;

    let (cancel, _guard) = request_cancellation();
    let created = state
        .pipeline
        .start_try_on(&user.user_id, job_id, &person, &cancel)
        .await?;

    Ok(Json(ApiResponse::success(created, "Try-on job started.")))
}

/// GET /api/customization/tryon/{job_id}: try-on status, reconciled locally.
pub async fn get_try_on_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> Result<Json<ApiResponse<TryOnJobStatus>>, PipelineError> {
    enforce_rate_limit(&state, &user)?;

    let (cancel, _guard) = request_cancellation();
    let status = state.pipeline.get_try_on_status(&job_id, &cancel).await?;

    Ok(Json(ApiResponse::success(status, "Try-on status retrieved.")))
}

/// GET /api/customization/jobs/{id}: the caller's own customization job.
pub async fn get_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CustomizationJob>>, PipelineError> {
    let job = state.pipeline.get_job(&user.user_id, id).await?;
    Ok(Json(ApiResponse::success(job, "Customization job retrieved.")))
}
