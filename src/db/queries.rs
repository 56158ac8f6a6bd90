use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::job::{CustomizationJob, JobStatus};

const JOB_COLUMNS: &str = r#"
    id, user_id, prompt, generation_request_id, generated_garment_url,
    tryon_job_id, tryon_status_url, tryon_result_url, status, last_error,
    created_at, updated_at
"#;

fn row_to_job(row: &PgRow) -> Result<CustomizationJob, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status =
        JobStatus::from_str(&status_str).map_err(|_| StoreError::UnknownStatus(status_str))?;

    Ok(CustomizationJob {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        prompt: row.try_get("prompt")?,
        generation_request_id: row.try_get("generation_request_id")?,
        generated_garment_url: row.try_get("generated_garment_url")?,
        try_on_job_id: row.try_get("tryon_job_id")?,
        try_on_status_url: row.try_get("tryon_status_url")?,
        try_on_result_url: row.try_get("tryon_result_url")?,
        status,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new customization job
pub async fn insert_job(pool: &PgPool, job: &CustomizationJob) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO customization_jobs
            (id, user_id, prompt, generation_request_id, generated_garment_url,
             tryon_job_id, tryon_status_url, tryon_result_url, status, last_error,
             created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(job.id)
    .bind(&job.user_id)
    .bind(&job.prompt)
    .bind(&job.generation_request_id)
    .bind(&job.generated_garment_url)
    .bind(&job.try_on_job_id)
    .bind(&job.try_on_status_url)
    .bind(&job.try_on_result_url)
    .bind(job.status.to_string())
    .bind(&job.last_error)
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<CustomizationJob>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM customization_jobs WHERE id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_job).transpose()
}

/// Update the mutable fields of a job. `user_id` is never written.
pub async fn update_job(pool: &PgPool, job: &CustomizationJob) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE customization_jobs
        SET generation_request_id = $2,
            generated_garment_url = $3,
            tryon_job_id = $4,
            tryon_status_url = $5,
            tryon_result_url = $6,
            status = $7,
            last_error = $8,
            updated_at = $9
        WHERE id = $1 AND user_id = $10
        "#,
    )
    .bind(job.id)
    .bind(&job.generation_request_id)
    .bind(&job.generated_garment_url)
    .bind(&job.try_on_job_id)
    .bind(&job.try_on_status_url)
    .bind(&job.try_on_result_url)
    .bind(job.status.to_string())
    .bind(&job.last_error)
    .bind(job.updated_at)
    .bind(&job.user_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(match get_job(pool, job.id).await? {
            Some(_) => StoreError::OwnerChanged(job.id),
            None => StoreError::Missing(job.id),
        });
    }

    Ok(())
}

/// Find the job currently linked to a try-on job (indexed lookup)
pub async fn find_job_by_tryon_job_id(
    pool: &PgPool,
    tryon_job_id: &str,
) -> Result<Option<CustomizationJob>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM customization_jobs WHERE tryon_job_id = $1 ORDER BY updated_at DESC LIMIT 1"
    ))
    .bind(tryon_job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_job).transpose()
}
