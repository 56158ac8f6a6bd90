use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::job::CustomizationJob;

/// Durable storage for customization jobs.
///
/// Only the pipeline writes jobs; reads may happen concurrently. Jobs are
/// never deleted.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a freshly created job.
    async fn create(&self, job: &CustomizationJob) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<CustomizationJob>, StoreError>;

    /// Overwrite the mutable fields of an existing job. The owner never changes.
    async fn update(&self, job: &CustomizationJob) -> Result<(), StoreError>;

    async fn find_by_try_on_job_id(
        &self,
        try_on_job_id: &str,
    ) -> Result<Option<CustomizationJob>, StoreError>;

    /// Round trip to the backing store, used by the health route.
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Process-local job store, used when no database is configured and in tests.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, CustomizationJob>>,
    by_try_on_id: RwLock<HashMap<String, Uuid>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every job owned by `user_id`, oldest first.
    pub fn jobs_for_user(&self, user_id: &str) -> Vec<CustomizationJob> {
        let mut owned: Vec<CustomizationJob> = self
            .jobs
            .read()
            .map(|jobs| {
                jobs.values()
                    .filter(|job| job.is_owned_by(user_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        owned.sort_by_key(|job| job.created_at);
        owned
    }

    fn index_try_on_id(&self, job: &CustomizationJob) -> Result<(), StoreError> {
        if let Some(try_on_id) = &job.try_on_job_id {
            self.by_try_on_id
                .write()
                .map_err(|_| StoreError::Poisoned)?
                .insert(try_on_id.clone(), job.id);
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &CustomizationJob) -> Result<(), StoreError> {
        self.jobs
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .insert(job.id, job.clone());
        self.index_try_on_id(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CustomizationJob>, StoreError> {
        let jobs = self.jobs.read().map_err(|_| StoreError::Poisoned)?;
        Ok(jobs.get(&id).cloned())
    }

    async fn update(&self, job: &CustomizationJob) -> Result<(), StoreError> {
        {
            let mut jobs = self.jobs.write().map_err(|_| StoreError::Poisoned)?;
            let stored = jobs.get_mut(&job.id).ok_or(StoreError::Missing(job.id))?;
            if stored.user_id != job.user_id {
                return Err(StoreError::OwnerChanged(job.id));
            }
            let created_at = stored.created_at;
            *stored = job.clone();
            stored.created_at = created_at;
        }
        self.index_try_on_id(job)
    }

    async fn find_by_try_on_job_id(
        &self,
        try_on_job_id: &str,
    ) -> Result<Option<CustomizationJob>, StoreError> {
        let id = {
            let index = self.by_try_on_id.read().map_err(|_| StoreError::Poisoned)?;
            match index.get(try_on_job_id) {
                Some(id) => *id,
                None => return Ok(None),
            }
        };
        // A job may have been re-pointed at a newer try-on since indexing.
        Ok(self
            .get(id)
            .await?
            .filter(|job| job.try_on_job_id.as_deref() == Some(try_on_job_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_get_update() {
        let store = InMemoryJobStore::new();
        let mut job = CustomizationJob::new("u1", "prompt");
        store.create(&job).await.unwrap();

        job.mark_garment_generated("https://x/y.png").unwrap();
        store.update(&job).await.unwrap();

        let loaded = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.generated_garment_url.as_deref(), Some("https://x/y.png"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_update_rejects_owner_change() {
        let store = InMemoryJobStore::new();
        let mut job = CustomizationJob::new("u1", "prompt");
        store.create(&job).await.unwrap();

        job.user_id = "intruder".to_string();
        let err = store.update(&job).await.unwrap_err();
        assert!(matches!(err, StoreError::OwnerChanged(_)));
        assert_eq!(store.get(job.id).await.unwrap().unwrap().user_id, "u1");
    }

    #[tokio::test]
    async fn test_update_unknown_job_fails() {
        let store = InMemoryJobStore::new();
        let job = CustomizationJob::new("u1", "prompt");
        assert!(matches!(store.update(&job).await, Err(StoreError::Missing(_))));
    }

    #[tokio::test]
    async fn test_find_by_try_on_job_id_follows_latest_link() {
        let store = InMemoryJobStore::new();
        let mut job = CustomizationJob::new("u1", "prompt");
        store.create(&job).await.unwrap();
        job.mark_garment_generated("https://x/y.png").unwrap();
        job.mark_try_on_started("t-1", None).unwrap();
        store.update(&job).await.unwrap();

        assert_eq!(store.find_by_try_on_job_id("t-1").await.unwrap().unwrap().id, job.id);

        job.mark_try_on_started("t-2", None).unwrap();
        store.update(&job).await.unwrap();
        assert!(store.find_by_try_on_job_id("t-1").await.unwrap().is_none());
        assert!(store.find_by_try_on_job_id("t-2").await.unwrap().is_some());
        assert!(store.find_by_try_on_job_id("nope").await.unwrap().is_none());
    }
}
