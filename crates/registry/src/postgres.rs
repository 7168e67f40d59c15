use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use common::JobId;
use domain::{Job, JobStatus};

use crate::aggregation::AggregationRecord;
use crate::error::{RegistryError, Result};
use crate::store::{AggregationStore, JobStore};

/// PostgreSQL-backed job store implementation.
///
/// Idempotency-key uniqueness is enforced by the `unique_idempotency_key`
/// constraint; version checks ride on a conditional `UPDATE`.
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    /// Creates a new PostgreSQL job store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_job(row: PgRow) -> Result<Job> {
        let status_str: String = row.try_get("status")?;
        let status = status_str.parse::<JobStatus>().map_err(|e| {
            RegistryError::Serialization(serde_json::Error::io(std::io::Error::other(e)))
        })?;

        Ok(Job {
            id: JobId::from_uuid(row.try_get::<Uuid, _>("id")?),
            idempotency_key: row.try_get("idempotency_key")?,
            starting_address: row.try_get("starting_address")?,
            destination_address: row.try_get("destination_address")?,
            email: row.try_get("email")?,
            status,
            additional_information: row.try_get("additional_information")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            version: row.try_get("version")?,
        })
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert(&self, job: Job) -> Result<Job> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, idempotency_key, starting_address, destination_address,
                              email, status, additional_information, created_at, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(&job.idempotency_key)
        .bind(&job.starting_address)
        .bind(&job.destination_address)
        .bind(&job.email)
        .bind(job.status.as_str())
        .bind(&job.additional_information)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.version)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(job),
            Err(e) => {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_idempotency_key")
                {
                    // Lost a creation race; report the winner's id.
                    let existing = self
                        .find_by_idempotency_key(&job.idempotency_key)
                        .await?
                        .ok_or(RegistryError::Database(sqlx::Error::RowNotFound))?;
                    return Err(RegistryError::IdempotencyKeyTaken {
                        key: job.idempotency_key.clone(),
                        existing: existing.id,
                    });
                }
                Err(RegistryError::Database(e))
            }
        }
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_job).transpose()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE idempotency_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_job).transpose()
    }

    async fn update(&self, mut job: Job, expected_version: i64) -> Result<Job> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, additional_information = $2, updated_at = $3, version = $4
            WHERE id = $5 AND version = $6
            "#,
        )
        .bind(job.status.as_str())
        .bind(&job.additional_information)
        .bind(now)
        .bind(expected_version + 1)
        .bind(job.id.as_uuid())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM jobs WHERE id = $1")
                .bind(job.id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

            return match actual {
                Some(actual) => Err(RegistryError::ConcurrencyConflict {
                    entity: "job",
                    id: job.id,
                    expected: expected_version,
                    actual,
                }),
                None => Err(RegistryError::NotFound(job.id)),
            };
        }

        job.version = expected_version + 1;
        job.updated_at = now;
        Ok(job)
    }
}

/// PostgreSQL-backed aggregation-record store implementation.
#[derive(Clone)]
pub struct PostgresAggregationStore {
    pool: PgPool,
}

impl PostgresAggregationStore {
    /// Creates a new PostgreSQL aggregation store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: PgRow) -> Result<AggregationRecord> {
        let directions: Option<serde_json::Value> = row.try_get("directions")?;
        let weather: Option<serde_json::Value> = row.try_get("weather")?;
        let imaging: Option<serde_json::Value> = row.try_get("imaging")?;

        Ok(AggregationRecord {
            job_id: JobId::from_uuid(row.try_get::<Uuid, _>("job_id")?),
            directions: directions.map(serde_json::from_value).transpose()?,
            weather: weather.map(serde_json::from_value).transpose()?,
            imaging: imaging.map(serde_json::from_value).transpose()?,
            completed: row.try_get("completed")?,
            version: row.try_get("version")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl AggregationStore for PostgresAggregationStore {
    async fn fetch_or_create(&self, job_id: JobId) -> Result<AggregationRecord> {
        sqlx::query(
            r#"
            INSERT INTO aggregations (job_id, completed, version, updated_at)
            VALUES ($1, FALSE, 1, $2)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM aggregations WHERE job_id = $1")
            .bind(job_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;

        Self::row_to_record(row)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<AggregationRecord>> {
        let row = sqlx::query("SELECT * FROM aggregations WHERE job_id = $1")
            .bind(job_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn update(
        &self,
        mut record: AggregationRecord,
        expected_version: i64,
    ) -> Result<AggregationRecord> {
        let directions = record.directions.as_ref().map(serde_json::to_value).transpose()?;
        let weather = record.weather.as_ref().map(serde_json::to_value).transpose()?;
        let imaging = record.imaging.as_ref().map(serde_json::to_value).transpose()?;
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE aggregations
            SET directions = $1, weather = $2, imaging = $3, completed = $4,
                version = $5, updated_at = $6
            WHERE job_id = $7 AND version = $8
            "#,
        )
        .bind(directions)
        .bind(weather)
        .bind(imaging)
        .bind(record.completed)
        .bind(expected_version + 1)
        .bind(now)
        .bind(record.job_id.as_uuid())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM aggregations WHERE job_id = $1")
                    .bind(record.job_id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await?;

            return match actual {
                Some(actual) => Err(RegistryError::ConcurrencyConflict {
                    entity: "aggregation",
                    id: record.job_id,
                    expected: expected_version,
                    actual,
                }),
                None => Err(RegistryError::NotFound(record.job_id)),
            };
        }

        record.version = expected_version + 1;
        record.updated_at = now;
        Ok(record)
    }

    async fn remove(&self, job_id: JobId) -> Result<()> {
        sqlx::query("DELETE FROM aggregations WHERE job_id = $1")
            .bind(job_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
