//! Job record and status state machine.

use chrono::{DateTime, Utc};
use common::JobId;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Lifecycle status of a travel-planning job.
///
/// Transitions:
/// ```text
/// Created ──► Geocoding ──► AwaitingParallelResults ──► Complete ──► Sent
///    └──────────┴──────────────────┴────────────────────────┴──► Failed
/// ```
/// `Sent` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum JobStatus {
    /// Job accepted by intake; `JobCreated` published.
    #[default]
    Created,

    /// The geocoding stage is resolving both addresses.
    Geocoding,

    /// Fan-out happened; the three branches are outstanding.
    AwaitingParallelResults,

    /// All three partial results arrived; `ProcessingComplete` published.
    Complete,

    /// Summary email dispatched (terminal state).
    Sent,

    /// Unrecoverable error at some stage (terminal state).
    Failed,
}

impl JobStatus {
    /// Position of the status along the happy path, used to detect
    /// re-delivered transitions. `Failed` sits past everything.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Created => 0,
            JobStatus::Geocoding => 1,
            JobStatus::AwaitingParallelResults => 2,
            JobStatus::Complete => 3,
            JobStatus::Sent => 4,
            JobStatus::Failed => 5,
        }
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Sent | JobStatus::Failed)
    }

    /// Returns true if the state machine permits moving to `next`.
    ///
    /// `Failed` is reachable from any non-terminal state; otherwise only
    /// the next happy-path status is allowed.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == JobStatus::Failed {
            return true;
        }
        next.rank() == self.rank() + 1
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "Created",
            JobStatus::Geocoding => "Geocoding",
            JobStatus::AwaitingParallelResults => "AwaitingParallelResults",
            JobStatus::Complete => "Complete",
            JobStatus::Sent => "Sent",
            JobStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Created" => Ok(JobStatus::Created),
            "Geocoding" => Ok(JobStatus::Geocoding),
            "AwaitingParallelResults" => Ok(JobStatus::AwaitingParallelResults),
            "Complete" => Ok(JobStatus::Complete),
            "Sent" => Ok(JobStatus::Sent),
            "Failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// The unit of work: one trip-planning request from intake to email.
///
/// The record is mutated by every stage as the job progresses; `version`
/// backs the registry's optimistic concurrency control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Correlation id on every event for this job.
    pub id: JobId,
    /// Caller-supplied key; unique across all jobs.
    pub idempotency_key: String,
    pub starting_address: String,
    pub destination_address: String,
    pub email: String,
    pub status: JobStatus,
    /// Human-readable detail, set on failure or notable transitions.
    pub additional_information: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Registry version, incremented on every committed update.
    pub version: i64,
}

impl Job {
    /// Creates a freshly accepted job in `Created` status.
    pub fn new(
        idempotency_key: impl Into<String>,
        starting_address: impl Into<String>,
        destination_address: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            idempotency_key: idempotency_key.into(),
            starting_address: starting_address.into(),
            destination_address: destination_address.into(),
            email: email.into(),
            status: JobStatus::Created,
            additional_information: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Returns true if the job has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Shallow shape checks on a job-creation request.
///
/// Full address and email verification is an upstream concern; the domain
/// only rejects input that can never form a valid job.
pub fn validate_request(
    starting_address: &str,
    destination_address: &str,
    email: &str,
) -> crate::error::Result<()> {
    if starting_address.trim().is_empty() {
        return Err(DomainError::Validation(
            "StartingAddress is required".to_string(),
        ));
    }
    if destination_address.trim().is_empty() {
        return Err(DomainError::Validation(
            "DestinationAddress is required".to_string(),
        ));
    }
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(DomainError::Validation("Email is malformed".to_string()));
    }
    Ok(())
}
