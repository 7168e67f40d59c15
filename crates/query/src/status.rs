//! Read-through cached job status lookup.

use std::time::Duration;

use cache::Cache;
use common::JobId;
use domain::Job;
use registry::JobStore;

use crate::error::{QueryError, Result};

/// Answers `GetJobStatus` with a read-through cache in front of the
/// registry.
///
/// A hit serves straight from the cache; a miss reads the registry and
/// populates the entry with a TTL. Writers invalidate through
/// [`invalidate`](Self::invalidate) (wired to `JobStatusUpdate` events by
/// [`StatusCacheInvalidator`](crate::StatusCacheInvalidator)).
#[derive(Clone)]
pub struct StatusQuery<S, C>
where
    S: JobStore,
    C: Cache<Job>,
{
    store: S,
    cache: C,
    ttl: Duration,
}

impl<S, C> StatusQuery<S, C>
where
    S: JobStore,
    C: Cache<Job>,
{
    /// Creates the query service with the given cache TTL.
    pub fn new(store: S, cache: C, ttl: Duration) -> Self {
        Self { store, cache, ttl }
    }

    /// Returns the job, or `NotFound`.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, job_id: JobId) -> Result<Job> {
        let key = job_id.to_string();

        if let Some(job) = self.cache.get(&key).await {
            return Ok(job);
        }

        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or(QueryError::NotFound(job_id))?;

        self.cache.set(&key, job.clone(), self.ttl).await;
        Ok(job)
    }

    /// Drops the cached entry for a job, forcing the next read through to
    /// the registry.
    pub async fn invalidate(&self, job_id: JobId) {
        self.cache.remove(&job_id.to_string()).await;
    }
}

#[cfg(test)]
mod tests {
    use cache::InMemoryTtlCache;
    use domain::JobStatus;
    use registry::{InMemoryJobStore, JobStore};

    use super::*;

    fn query(store: InMemoryJobStore) -> StatusQuery<InMemoryJobStore, InMemoryTtlCache<Job>> {
        StatusQuery::new(store, InMemoryTtlCache::new("status-test"), Duration::from_secs(30))
    }

    async fn seeded(store: &InMemoryJobStore) -> Job {
        store
            .insert(Job::new("key-1", "A", "B", "x@example.com"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn miss_reads_through_and_populates() {
        let store = InMemoryJobStore::new();
        let job = seeded(&store).await;
        let query = query(store.clone());

        let first = query.get(job.id).await.unwrap();
        assert_eq!(first.status, JobStatus::Created);

        // Second read is served from cache even if the store changes
        // underneath without an invalidation.
        let mut updated = job.clone();
        updated.status = JobStatus::Geocoding;
        store.update(updated, job.version).await.unwrap();

        let second = query.get(job.id).await.unwrap();
        assert_eq!(second.status, JobStatus::Created);
    }

    #[tokio::test]
    async fn invalidation_exposes_the_latest_write() {
        let store = InMemoryJobStore::new();
        let job = seeded(&store).await;
        let query = query(store.clone());

        query.get(job.id).await.unwrap();

        let mut updated = job.clone();
        updated.status = JobStatus::Failed;
        updated.additional_information = Some("geocoder down".into());
        store.update(updated, job.version).await.unwrap();

        query.invalidate(job.id).await;

        let read = query.get(job.id).await.unwrap();
        assert_eq!(read.status, JobStatus::Failed);
        assert_eq!(read.additional_information.as_deref(), Some("geocoder down"));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_also_refreshes() {
        let store = InMemoryJobStore::new();
        let job = seeded(&store).await;
        let query = StatusQuery::new(
            store.clone(),
            InMemoryTtlCache::new("status-test"),
            Duration::from_secs(5),
        );

        query.get(job.id).await.unwrap();

        let mut updated = job.clone();
        updated.status = JobStatus::Geocoding;
        store.update(updated, job.version).await.unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;

        let read = query.get(job.id).await.unwrap();
        assert_eq!(read.status, JobStatus::Geocoding);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let query = query(InMemoryJobStore::new());
        let result = query.get(JobId::new()).await;
        assert!(matches!(result, Err(QueryError::NotFound(_))));
    }
}
