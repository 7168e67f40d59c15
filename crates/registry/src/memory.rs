use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use common::JobId;
use domain::Job;

use crate::aggregation::AggregationRecord;
use crate::error::{RegistryError, Result};
use crate::store::{AggregationStore, JobStore};

#[derive(Default)]
struct JobStoreState {
    jobs: HashMap<JobId, Job>,
    by_key: HashMap<String, JobId>,
}

/// In-memory job store implementation for testing.
///
/// Check-and-insert and version-checked updates run under a single write
/// lock, giving the same atomicity a unique constraint and a conditional
/// `UPDATE` provide in the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    state: Arc<RwLock<JobStoreState>>,
}

impl InMemoryJobStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored jobs.
    pub async fn job_count(&self) -> usize {
        self.state.read().await.jobs.len()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<Job> {
        let mut state = self.state.write().await;

        if let Some(existing) = state.by_key.get(&job.idempotency_key) {
            return Err(RegistryError::IdempotencyKeyTaken {
                key: job.idempotency_key.clone(),
                existing: *existing,
            });
        }

        state.by_key.insert(job.idempotency_key.clone(), job.id);
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>> {
        Ok(self.state.read().await.jobs.get(&job_id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Job>> {
        let state = self.state.read().await;
        Ok(state
            .by_key
            .get(key)
            .and_then(|id| state.jobs.get(id))
            .cloned())
    }

    async fn update(&self, mut job: Job, expected_version: i64) -> Result<Job> {
        let mut state = self.state.write().await;

        let stored = state
            .jobs
            .get(&job.id)
            .ok_or(RegistryError::NotFound(job.id))?;

        if stored.version != expected_version {
            return Err(RegistryError::ConcurrencyConflict {
                entity: "job",
                id: job.id,
                expected: expected_version,
                actual: stored.version,
            });
        }

        job.version = expected_version + 1;
        job.updated_at = Utc::now();
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }
}

/// In-memory aggregation-record store implementation for testing.
#[derive(Clone, Default)]
pub struct InMemoryAggregationStore {
    records: Arc<RwLock<HashMap<JobId, AggregationRecord>>>,
}

impl InMemoryAggregationStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl AggregationStore for InMemoryAggregationStore {
    async fn fetch_or_create(&self, job_id: JobId) -> Result<AggregationRecord> {
        let mut records = self.records.write().await;
        Ok(records
            .entry(job_id)
            .or_insert_with(|| AggregationRecord::new(job_id))
            .clone())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<AggregationRecord>> {
        Ok(self.records.read().await.get(&job_id).cloned())
    }

    async fn update(
        &self,
        mut record: AggregationRecord,
        expected_version: i64,
    ) -> Result<AggregationRecord> {
        let mut records = self.records.write().await;

        let stored = records
            .get(&record.job_id)
            .ok_or(RegistryError::NotFound(record.job_id))?;

        if stored.version != expected_version {
            return Err(RegistryError::ConcurrencyConflict {
                entity: "aggregation",
                id: record.job_id,
                expected: expected_version,
                actual: stored.version,
            });
        }

        record.version = expected_version + 1;
        record.updated_at = Utc::now();
        records.insert(record.job_id, record.clone());
        Ok(record)
    }

    async fn remove(&self, job_id: JobId) -> Result<()> {
        self.records.write().await.remove(&job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use domain::{BranchOutcome, JobStatus, PartialResult};

    use super::*;
    use crate::aggregation::DuplicatePolicy;

    #[tokio::test]
    async fn insert_and_get_job() {
        let store = InMemoryJobStore::new();
        let job = Job::new("key-1", "A", "B", "x@example.com");
        let job_id = job.id;

        store.insert(job).await.unwrap();

        let loaded = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(loaded.id, job_id);
        assert_eq!(loaded.status, JobStatus::Created);
        assert_eq!(store.job_count().await, 1);
    }

    #[tokio::test]
    async fn insert_with_taken_key_reports_winner() {
        let store = InMemoryJobStore::new();
        let first = Job::new("key-1", "A", "B", "x@example.com");
        let winner_id = first.id;
        store.insert(first).await.unwrap();

        let second = Job::new("key-1", "C", "D", "y@example.com");
        let result = store.insert(second).await;

        match result {
            Err(RegistryError::IdempotencyKeyTaken { key, existing }) => {
                assert_eq!(key, "key-1");
                assert_eq!(existing, winner_id);
            }
            other => panic!("expected IdempotencyKeyTaken, got {other:?}"),
        }
        assert_eq!(store.job_count().await, 1);
    }

    #[tokio::test]
    async fn find_by_idempotency_key() {
        let store = InMemoryJobStore::new();
        let job = Job::new("key-1", "A", "B", "x@example.com");
        let job_id = job.id;
        store.insert(job).await.unwrap();

        let found = store.find_by_idempotency_key("key-1").await.unwrap();
        assert_eq!(found.unwrap().id, job_id);

        let missing = store.find_by_idempotency_key("key-2").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn update_bumps_version() {
        let store = InMemoryJobStore::new();
        let job = Job::new("key-1", "A", "B", "x@example.com");
        let inserted = store.insert(job).await.unwrap();

        let mut updated = inserted.clone();
        updated.status = JobStatus::Geocoding;
        let stored = store.update(updated, inserted.version).await.unwrap();

        assert_eq!(stored.version, inserted.version + 1);
        assert_eq!(stored.status, JobStatus::Geocoding);
    }

    #[tokio::test]
    async fn update_with_stale_version_conflicts() {
        let store = InMemoryJobStore::new();
        let job = Job::new("key-1", "A", "B", "x@example.com");
        let inserted = store.insert(job).await.unwrap();

        let mut first = inserted.clone();
        first.status = JobStatus::Geocoding;
        store.update(first, inserted.version).await.unwrap();

        let mut stale = inserted.clone();
        stale.status = JobStatus::Failed;
        let result = store.update(stale, inserted.version).await;

        assert!(matches!(
            result,
            Err(RegistryError::ConcurrencyConflict { expected: 1, actual: 2, .. })
        ));
    }

    #[tokio::test]
    async fn update_unknown_job_is_not_found() {
        let store = InMemoryJobStore::new();
        let job = Job::new("key-1", "A", "B", "x@example.com");
        let result = store.update(job, 1).await;
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn fetch_or_create_is_idempotent() {
        let store = InMemoryAggregationStore::new();
        let job_id = JobId::new();

        let first = store.fetch_or_create(job_id).await.unwrap();
        let second = store.fetch_or_create(job_id).await.unwrap();

        assert_eq!(first.version, second.version);
        assert_eq!(store.record_count().await, 1);
    }

    #[tokio::test]
    async fn aggregation_cas_update() {
        let store = InMemoryAggregationStore::new();
        let job_id = JobId::new();

        let mut record = store.fetch_or_create(job_id).await.unwrap();
        record.record(
            PartialResult::Weather(BranchOutcome::empty()),
            DuplicatePolicy::KeepFirst,
        );
        let stored = store.update(record.clone(), record.version).await.unwrap();
        assert_eq!(stored.version, 2);

        // A writer holding the old version loses.
        let result = store.update(record.clone(), record.version).await;
        assert!(matches!(
            result,
            Err(RegistryError::ConcurrencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn remove_aggregation_record() {
        let store = InMemoryAggregationStore::new();
        let job_id = JobId::new();
        store.fetch_or_create(job_id).await.unwrap();

        store.remove(job_id).await.unwrap();
        assert!(store.get(job_id).await.unwrap().is_none());
    }
}
