//! Payload types for the three parallel branches.

use serde::{Deserialize, Serialize};

/// The three partial-result kinds the fan-in barrier waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchKind {
    Directions,
    Weather,
    Imaging,
}

impl BranchKind {
    /// All expected kinds, in no particular order.
    pub fn all() -> [BranchKind; 3] {
        [BranchKind::Directions, BranchKind::Weather, BranchKind::Imaging]
    }

    /// Returns the kind name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchKind::Directions => "Directions",
            BranchKind::Weather => "Weather",
            BranchKind::Imaging => "Imaging",
        }
    }
}

impl std::fmt::Display for BranchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one branch for one job.
///
/// A branch always produces an outcome, even on provider failure; an empty
/// payload with `success == true` is valid (e.g. no image available for the
/// destination). A dropped outcome would stall the fan-in barrier forever,
/// so failures are encoded, never swallowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchOutcome<T> {
    pub success: bool,
    pub payload: Option<T>,
    /// Failure description when `success == false`.
    pub detail: Option<String>,
}

impl<T> BranchOutcome<T> {
    /// A successful outcome carrying a payload.
    pub fn ok(payload: T) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            detail: None,
        }
    }

    /// A successful outcome with nothing to report.
    pub fn empty() -> Self {
        Self {
            success: true,
            payload: None,
            detail: None,
        }
    }

    /// A failed outcome with a description.
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: None,
            detail: Some(detail.into()),
        }
    }
}

/// Driving directions between the two geocoded addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub summary: String,
    pub distance_meters: u64,
    pub duration_seconds: u64,
    pub steps: Vec<String>,
}

/// Weather forecast at the destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub description: String,
    pub temperature_celsius: f64,
}

/// Reference to an image of the destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageReference {
    pub url: String,
    pub attribution: Option<String>,
}

/// One partial result produced by a branch stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartialResult {
    Directions(BranchOutcome<RoutePlan>),
    Weather(BranchOutcome<Forecast>),
    Imaging(BranchOutcome<ImageReference>),
}

impl PartialResult {
    /// Returns which of the three expected kinds this result is.
    pub fn kind(&self) -> BranchKind {
        match self {
            PartialResult::Directions(_) => BranchKind::Directions,
            PartialResult::Weather(_) => BranchKind::Weather,
            PartialResult::Imaging(_) => BranchKind::Imaging,
        }
    }
}
