use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::job::CustomizationJob;
use crate::services::job_store::JobStore;

pub mod queries;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// PostgreSQL-backed [`JobStore`].
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &CustomizationJob) -> Result<(), StoreError> {
        queries::insert_job(&self.pool, job).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<CustomizationJob>, StoreError> {
        queries::get_job(&self.pool, id).await
    }

    async fn update(&self, job: &CustomizationJob) -> Result<(), StoreError> {
        queries::update_job(&self.pool, job).await
    }

    async fn find_by_try_on_job_id(
        &self,
        try_on_job_id: &str,
    ) -> Result<Option<CustomizationJob>, StoreError> {
        queries::find_job_by_tryon_job_id(&self.pool, try_on_job_id).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
