//! The event vocabulary exchanged between stages.

use common::{Coordinates, JobId};
use event_bus::EventEnvelope;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::job::JobStatus;
use crate::results::{BranchOutcome, Forecast, ImageReference, RoutePlan};

/// Topic names, one per event type.
pub mod topics {
    pub const JOB_CREATED: &str = "JobCreated";
    pub const LOCATIONS_READY: &str = "LocationsReady";
    pub const DIRECTIONS_READY: &str = "DirectionsReady";
    pub const WEATHER_READY: &str = "WeatherReady";
    pub const IMAGE_READY: &str = "ImageReady";
    pub const PROCESSING_COMPLETE: &str = "ProcessingComplete";
    pub const JOB_STATUS_UPDATE: &str = "JobStatusUpdate";
}

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the saga.
/// They are immutable and named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name, which doubles as the bus topic.
    fn event_type(&self) -> &'static str;
}

/// Events that drive the trip-planning saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TravelEvent {
    /// A job was accepted by intake.
    JobCreated(JobCreatedData),

    /// Both addresses were geocoded; fan-out to the three branches.
    LocationsReady(LocationsReadyData),

    /// The directions branch finished (successfully or not).
    DirectionsReady(BranchResultData<RoutePlan>),

    /// The weather branch finished (successfully or not).
    WeatherReady(BranchResultData<Forecast>),

    /// The imaging branch finished (successfully or not).
    ImageReady(BranchResultData<ImageReference>),

    /// All three branches are in; the summary can be assembled.
    ProcessingComplete(ProcessingCompleteData),

    /// A job status transition was committed to the registry.
    JobStatusUpdate(JobStatusUpdateData),
}

impl DomainEvent for TravelEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TravelEvent::JobCreated(_) => topics::JOB_CREATED,
            TravelEvent::LocationsReady(_) => topics::LOCATIONS_READY,
            TravelEvent::DirectionsReady(_) => topics::DIRECTIONS_READY,
            TravelEvent::WeatherReady(_) => topics::WEATHER_READY,
            TravelEvent::ImageReady(_) => topics::IMAGE_READY,
            TravelEvent::ProcessingComplete(_) => topics::PROCESSING_COMPLETE,
            TravelEvent::JobStatusUpdate(_) => topics::JOB_STATUS_UPDATE,
        }
    }
}

/// Data for the JobCreated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCreatedData {
    pub job_id: JobId,
    pub starting_address: String,
    pub destination_address: String,
    pub email: String,
}

/// Data for the LocationsReady event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationsReadyData {
    pub job_id: JobId,
    pub starting_coordinates: Coordinates,
    pub destination_coordinates: Coordinates,
    pub starting_address: String,
    pub destination_address: String,
    pub email: String,
}

/// Data for a branch completion event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchResultData<T> {
    pub job_id: JobId,
    pub outcome: BranchOutcome<T>,
}

/// Data for the ProcessingComplete event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingCompleteData {
    pub job_id: JobId,
    pub email: String,
    pub starting_address: String,
    pub destination_address: String,
    pub directions: BranchOutcome<RoutePlan>,
    pub weather: BranchOutcome<Forecast>,
    pub imaging: BranchOutcome<ImageReference>,
}

/// Data for the JobStatusUpdate event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusUpdateData {
    pub job_id: JobId,
    pub status: JobStatus,
    pub additional_information: Option<String>,
}

// Convenience constructors
impl TravelEvent {
    /// Creates a JobCreated event.
    pub fn job_created(
        job_id: JobId,
        starting_address: impl Into<String>,
        destination_address: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        TravelEvent::JobCreated(JobCreatedData {
            job_id,
            starting_address: starting_address.into(),
            destination_address: destination_address.into(),
            email: email.into(),
        })
    }

    /// Creates a DirectionsReady event.
    pub fn directions_ready(job_id: JobId, outcome: BranchOutcome<RoutePlan>) -> Self {
        TravelEvent::DirectionsReady(BranchResultData { job_id, outcome })
    }

    /// Creates a WeatherReady event.
    pub fn weather_ready(job_id: JobId, outcome: BranchOutcome<Forecast>) -> Self {
        TravelEvent::WeatherReady(BranchResultData { job_id, outcome })
    }

    /// Creates an ImageReady event.
    pub fn image_ready(job_id: JobId, outcome: BranchOutcome<ImageReference>) -> Self {
        TravelEvent::ImageReady(BranchResultData { job_id, outcome })
    }

    /// Creates a JobStatusUpdate event.
    pub fn status_update(
        job_id: JobId,
        status: JobStatus,
        additional_information: Option<String>,
    ) -> Self {
        TravelEvent::JobStatusUpdate(JobStatusUpdateData {
            job_id,
            status,
            additional_information,
        })
    }

    /// Returns the job this event belongs to.
    pub fn job_id(&self) -> JobId {
        match self {
            TravelEvent::JobCreated(data) => data.job_id,
            TravelEvent::LocationsReady(data) => data.job_id,
            TravelEvent::DirectionsReady(data) => data.job_id,
            TravelEvent::WeatherReady(data) => data.job_id,
            TravelEvent::ImageReady(data) => data.job_id,
            TravelEvent::ProcessingComplete(data) => data.job_id,
            TravelEvent::JobStatusUpdate(data) => data.job_id,
        }
    }

    /// Wraps the event in a bus envelope with the job id as correlation id.
    pub fn to_envelope(&self) -> Result<EventEnvelope, serde_json::Error> {
        Ok(EventEnvelope::builder()
            .event_type(self.event_type())
            .correlation_id(self.job_id())
            .payload(self)?
            .build())
    }

    /// Parses an event back out of a bus envelope.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self, serde_json::Error> {
        serde_json::from_value(envelope.payload.clone())
    }
}
