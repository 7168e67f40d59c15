use common::JobId;
use thiserror::Error;

/// Errors that can occur when interacting with the registry stores.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The job does not exist.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// An idempotency key is already bound to another job.
    /// Carries the winning job's id so callers can resolve the race.
    #[error("idempotency key '{key}' already maps to job {existing}")]
    IdempotencyKeyTaken { key: String, existing: JobId },

    /// A version-checked update lost against a concurrent writer.
    #[error("concurrency conflict for {entity} {id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        entity: &'static str,
        id: JobId,
        expected: i64,
        actual: i64,
    },

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Publishing a follow-on event failed.
    #[error("event bus error: {0}")]
    Bus(#[from] event_bus::BusError),
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
