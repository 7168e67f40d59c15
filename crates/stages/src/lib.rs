//! Stage processors for the trip-planning saga.
//!
//! Five independent, stateless event handlers plus the fan-in barrier:
//!
//! 1. [`GeocodingStage`] consumes `JobCreated`, resolves both addresses
//!    through a normalized TTL cache and publishes `LocationsReady`.
//! 2. [`DirectionsStage`], [`WeatherStage`] and [`ImagingStage`] each
//!    consume `LocationsReady` independently and always publish their
//!    partial result, encoding failures instead of dropping them.
//! 3. [`FanInAggregator`] consumes the three partial-result events and
//!    publishes `ProcessingComplete` exactly once per job.
//! 4. [`EmailStage`] consumes `ProcessingComplete`, sends the summary and
//!    moves the job to `Sent`.
//!
//! Each stage runs as a consumer group on the event bus and may execute as
//! any number of concurrent instances; all per-job mutations go through the
//! registry's version-checked stores.

pub mod aggregator;
pub mod directions;
pub mod email;
pub mod geocoding;
pub mod imaging;
pub mod providers;
pub(crate) mod stage;
pub mod weather;

pub use aggregator::FanInAggregator;
pub use directions::DirectionsStage;
pub use email::{EmailStage, TripSummary};
pub use geocoding::{GeocodeCache, GeocodingStage, normalize_address};
pub use imaging::ImagingStage;
pub use providers::{
    DirectionsProvider, EmailSender, GeocodingProvider, ImagingProvider, InMemoryDirectionsProvider,
    InMemoryEmailSender, InMemoryImagingProvider, InMemoryWeatherProvider, ProviderError,
    StaticGeocodingProvider, WeatherProvider,
};
pub use weather::WeatherStage;
