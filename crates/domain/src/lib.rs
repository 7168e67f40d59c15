//! Domain layer for the trip-planning saga.
//!
//! Defines the [`Job`] record with its status state machine, the event
//! vocabulary exchanged between stages ([`TravelEvent`]), and the payload
//! types carried by the three parallel branches.

pub mod error;
pub mod events;
pub mod job;
pub mod results;

pub use common::{Coordinates, JobId};
pub use error::DomainError;
pub use events::{
    BranchResultData, DomainEvent, JobCreatedData, JobStatusUpdateData, LocationsReadyData,
    ProcessingCompleteData, TravelEvent, topics,
};
pub use job::{Job, JobStatus, validate_request};
pub use results::{BranchKind, BranchOutcome, Forecast, ImageReference, PartialResult, RoutePlan};
