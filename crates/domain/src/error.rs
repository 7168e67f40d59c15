//! Domain error types.

use thiserror::Error;

/// Errors raised by domain-level invariants.
#[derive(Debug, Clone, Error)]
pub enum DomainError {
    /// Input failed shape validation before entering the saga.
    #[error("validation error: {0}")]
    Validation(String),
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
