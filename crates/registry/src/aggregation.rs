//! Per-job fan-in aggregation record.

use chrono::{DateTime, Utc};
use common::JobId;
use domain::{BranchKind, BranchOutcome, Forecast, ImageReference, PartialResult, RoutePlan};
use serde::{Deserialize, Serialize};

/// What to do when a branch kind arrives a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Ignore the duplicate; the first recorded value wins.
    #[default]
    KeepFirst,
    /// Overwrite with the latest value. Never recounted as a new arrival.
    KeepLatest,
}

/// Tracks which of the three expected partial results have arrived for a
/// job, keeping the latest value of each.
///
/// The record is set-valued by design: arrivals are recorded by kind, so a
/// duplicate delivery can never be mistaken for a new arrival the way a
/// scalar counter would. `completed` flips in the same version-checked
/// write as the third arrival, which is what makes the completion event
/// fire exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationRecord {
    pub job_id: JobId,
    pub directions: Option<BranchOutcome<RoutePlan>>,
    pub weather: Option<BranchOutcome<Forecast>>,
    pub imaging: Option<BranchOutcome<ImageReference>>,
    /// Set when the completion event for this job has been published.
    pub completed: bool,
    /// Store version backing optimistic concurrency.
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl AggregationRecord {
    /// Creates an empty record for a job.
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            directions: None,
            weather: None,
            imaging: None,
            completed: false,
            version: 1,
            updated_at: Utc::now(),
        }
    }

    /// Returns true if an entry for the kind has been recorded.
    pub fn has(&self, kind: BranchKind) -> bool {
        match kind {
            BranchKind::Directions => self.directions.is_some(),
            BranchKind::Weather => self.weather.is_some(),
            BranchKind::Imaging => self.imaging.is_some(),
        }
    }

    /// Returns true once all three expected kinds have arrived.
    pub fn is_complete(&self) -> bool {
        BranchKind::all().iter().all(|kind| self.has(*kind))
    }

    /// Returns all three outcomes once the record is complete.
    pub fn outcomes(
        &self,
    ) -> Option<(
        BranchOutcome<RoutePlan>,
        BranchOutcome<Forecast>,
        BranchOutcome<ImageReference>,
    )> {
        Some((
            self.directions.clone()?,
            self.weather.clone()?,
            self.imaging.clone()?,
        ))
    }

    /// Records a partial result.
    ///
    /// Returns true if the entry is a new arrival; a duplicate returns
    /// false regardless of policy, so callers never recount it.
    pub fn record(&mut self, result: PartialResult, policy: DuplicatePolicy) -> bool {
        let kind = result.kind();
        let duplicate = self.has(kind);
        if duplicate && policy == DuplicatePolicy::KeepFirst {
            return false;
        }
        match result {
            PartialResult::Directions(outcome) => self.directions = Some(outcome),
            PartialResult::Weather(outcome) => self.weather = Some(outcome),
            PartialResult::Imaging(outcome) => self.imaging = Some(outcome),
        }
        !duplicate
    }
}
