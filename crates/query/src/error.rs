//! Query error types.

use common::JobId;
use thiserror::Error;

/// Errors that can occur on the status query path.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The job does not exist.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The underlying registry failed.
    #[error("registry error: {0}")]
    Registry(#[from] registry::RegistryError),
}

/// Result type for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;
