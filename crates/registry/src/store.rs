use async_trait::async_trait;

use common::JobId;
use domain::Job;

use crate::aggregation::AggregationRecord;
use crate::error::Result;

/// Durable keyed store for [`Job`] records.
///
/// All implementations must be thread-safe and must make `insert` and
/// `update` atomic with respect to concurrent callers: inserts enforce the
/// idempotency-key uniqueness in the store itself (unique constraint, not a
/// read-then-write), and updates are version-checked compare-and-swap.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a new job.
    ///
    /// Fails with `IdempotencyKeyTaken` if another job already holds the
    /// idempotency key; the error carries the winner's id.
    async fn insert(&self, job: Job) -> Result<Job>;

    /// Retrieves a job by id. Returns None if it doesn't exist.
    async fn get(&self, job_id: JobId) -> Result<Option<Job>>;

    /// Retrieves the job bound to an idempotency key, if any.
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Job>>;

    /// Persists `job` if the stored version still equals `expected_version`.
    ///
    /// On success the stored version is `expected_version + 1` and the
    /// updated record is returned. Fails with `ConcurrencyConflict` if a
    /// concurrent writer got there first.
    async fn update(&self, job: Job, expected_version: i64) -> Result<Job>;
}

/// Durable keyed store for fan-in [`AggregationRecord`]s.
///
/// The aggregator's exactly-once guarantee rests on `update` being a true
/// compare-and-swap in the backing store.
#[async_trait]
pub trait AggregationStore: Send + Sync {
    /// Returns the record for the job, creating an empty one if absent.
    ///
    /// Concurrent callers for the same job all observe a single record.
    async fn fetch_or_create(&self, job_id: JobId) -> Result<AggregationRecord>;

    /// Retrieves a record without creating it.
    async fn get(&self, job_id: JobId) -> Result<Option<AggregationRecord>>;

    /// Persists `record` if the stored version still equals
    /// `expected_version`; bumps the version on success.
    async fn update(
        &self,
        record: AggregationRecord,
        expected_version: i64,
    ) -> Result<AggregationRecord>;

    /// Deletes the record, if present.
    async fn remove(&self, job_id: JobId) -> Result<()>;
}
