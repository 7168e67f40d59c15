//! Geocoding stage: `JobCreated` in, `LocationsReady` out.

use std::time::Duration;

use async_trait::async_trait;
use cache::Cache;
use common::{Coordinates, JobId};
use domain::{JobStatus, LocationsReadyData, TravelEvent};
use event_bus::{EventBus, EventEnvelope, EventHandler, HandlerError};
use registry::{JobRegistry, JobStore};

use crate::providers::{GeocodingProvider, ProviderError};
use crate::stage::{parse_event, publish_error, registry_error};

/// Normalizes an address for cache keying: trimmed, lower-cased.
///
/// Two textually different but equivalent addresses share a cache entry.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Cache-aside front for a geocoding provider.
///
/// On a miss the provider is consulted and the result stored under the
/// normalized address with a bounded TTL.
pub struct GeocodeCache<C, G>
where
    C: Cache<Coordinates>,
    G: GeocodingProvider,
{
    cache: C,
    provider: G,
    ttl: Duration,
}

impl<C, G> GeocodeCache<C, G>
where
    C: Cache<Coordinates>,
    G: GeocodingProvider,
{
    /// Creates a cache-aside geocoder with the given entry TTL.
    pub fn new(cache: C, provider: G, ttl: Duration) -> Self {
        Self {
            cache,
            provider,
            ttl,
        }
    }

    /// Resolves an address, preferring the cache.
    pub async fn resolve(
        &self,
        address: &str,
        correlation_id: JobId,
    ) -> Result<Coordinates, ProviderError> {
        let key = normalize_address(address);

        if let Some(coordinates) = self.cache.get(&key).await {
            return Ok(coordinates);
        }

        let coordinates = self.provider.geocode(address, correlation_id).await?;
        self.cache.set(&key, coordinates, self.ttl).await;
        Ok(coordinates)
    }

    /// Drops the cached entry for an address, if present.
    pub async fn invalidate(&self, address: &str) {
        self.cache.remove(&normalize_address(address)).await;
    }
}

/// Consumes `JobCreated`, geocodes both addresses and fans out.
///
/// Transitions `Created -> Geocoding` on receipt and
/// `Geocoding -> AwaitingParallelResults` once both addresses resolve,
/// committing each before publishing `LocationsReady`. A failed geocode
/// moves the job to `Failed` and publishes nothing downstream.
pub struct GeocodingStage<S, B, C, G>
where
    S: JobStore,
    B: EventBus,
    C: Cache<Coordinates>,
    G: GeocodingProvider,
{
    registry: JobRegistry<S, B>,
    bus: B,
    geocoder: GeocodeCache<C, G>,
}

impl<S, B, C, G> GeocodingStage<S, B, C, G>
where
    S: JobStore,
    B: EventBus,
    C: Cache<Coordinates>,
    G: GeocodingProvider,
{
    /// Creates the stage.
    pub fn new(registry: JobRegistry<S, B>, bus: B, geocoder: GeocodeCache<C, G>) -> Self {
        Self {
            registry,
            bus,
            geocoder,
        }
    }

    async fn resolve_or_fail(
        &self,
        job_id: JobId,
        address: &str,
    ) -> Result<Option<Coordinates>, HandlerError> {
        match self.geocoder.resolve(address, job_id).await {
            Ok(coordinates) => Ok(Some(coordinates)),
            Err(ProviderError::Transient(msg)) => Err(HandlerError::Transient(msg)),
            Err(ProviderError::Permanent(msg)) => {
                self.registry
                    .fail(job_id, format!("geocoding failed for '{address}': {msg}"))
                    .await
                    .map_err(registry_error)?;
                metrics::counter!("geocoding_failed_total").increment(1);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl<S, B, C, G> EventHandler for GeocodingStage<S, B, C, G>
where
    S: JobStore,
    B: EventBus,
    C: Cache<Coordinates>,
    G: GeocodingProvider,
{
    fn name(&self) -> &'static str {
        "geocoding"
    }

    #[tracing::instrument(skip(self, envelope), fields(job_id = %envelope.correlation_id))]
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let TravelEvent::JobCreated(data) = parse_event(envelope)? else {
            return Err(HandlerError::Permanent(format!(
                "geocoding stage received '{}'",
                envelope.event_type
            )));
        };
        let job_id = data.job_id;

        let transition = self
            .registry
            .advance(job_id, JobStatus::Created, JobStatus::Geocoding, None)
            .await
            .map_err(registry_error)?;

        // Past the fan-out (or failed): someone already finished this work.
        if transition.job().status.rank() > JobStatus::AwaitingParallelResults.rank() {
            tracing::debug!(status = %transition.job().status, "duplicate JobCreated, skipping");
            return Ok(());
        }

        let Some(starting_coordinates) =
            self.resolve_or_fail(job_id, &data.starting_address).await?
        else {
            return Ok(());
        };
        let Some(destination_coordinates) = self
            .resolve_or_fail(job_id, &data.destination_address)
            .await?
        else {
            return Ok(());
        };

        // Commit the fan-out transition before publishing; a crash between
        // the two is healed by redelivery, since downstream dedups.
        self.registry
            .advance(
                job_id,
                JobStatus::Geocoding,
                JobStatus::AwaitingParallelResults,
                None,
            )
            .await
            .map_err(registry_error)?;

        let event = TravelEvent::LocationsReady(LocationsReadyData {
            job_id,
            starting_coordinates,
            destination_coordinates,
            starting_address: data.starting_address,
            destination_address: data.destination_address,
            email: data.email,
        });
        self.bus
            .publish(event.to_envelope().map_err(|e| {
                HandlerError::Permanent(format!("unencodable LocationsReady: {e}"))
            })?)
            .await
            .map_err(publish_error)?;

        metrics::counter!("geocoding_completed_total").increment(1);
        Ok(())
    }

    async fn on_dead_letter(&self, envelope: &EventEnvelope, error: &HandlerError) {
        let job_id = envelope.correlation_id;
        if let Err(e) = self
            .registry
            .fail(job_id, format!("geocoding gave up: {error}"))
            .await
        {
            tracing::error!(%job_id, error = %e, "failed to mark job failed after dead letter");
        }
    }
}
