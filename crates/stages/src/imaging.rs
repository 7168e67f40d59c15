//! Imaging branch: `LocationsReady` in, `ImageReady` out.

use async_trait::async_trait;
use domain::{BranchKind, BranchOutcome, TravelEvent};
use event_bus::{EventBus, EventEnvelope, EventHandler, HandlerError};
use registry::AggregationStore;

use crate::providers::{ImagingProvider, ProviderError};
use crate::stage::{parse_event, publish_error, registry_error};

/// Looks up a destination image for a job.
///
/// "No image available" is a successful, empty outcome; only an actual
/// provider failure is encoded as failed. Either way exactly one
/// `ImageReady` reaches the fan-in barrier.
pub struct ImagingStage<A, B, P>
where
    A: AggregationStore,
    B: EventBus,
    P: ImagingProvider,
{
    aggregation: A,
    bus: B,
    provider: P,
}

impl<A, B, P> ImagingStage<A, B, P>
where
    A: AggregationStore,
    B: EventBus,
    P: ImagingProvider,
{
    /// Creates the stage.
    pub fn new(aggregation: A, bus: B, provider: P) -> Self {
        Self {
            aggregation,
            bus,
            provider,
        }
    }
}

#[async_trait]
impl<A, B, P> EventHandler for ImagingStage<A, B, P>
where
    A: AggregationStore,
    B: EventBus,
    P: ImagingProvider,
{
    fn name(&self) -> &'static str {
        "imaging"
    }

    #[tracing::instrument(skip(self, envelope), fields(job_id = %envelope.correlation_id))]
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let TravelEvent::LocationsReady(data) = parse_event(envelope)? else {
            return Err(HandlerError::Permanent(format!(
                "imaging stage received '{}'",
                envelope.event_type
            )));
        };
        let job_id = data.job_id;

        if let Some(record) = self.aggregation.get(job_id).await.map_err(registry_error)?
            && (record.completed || record.has(BranchKind::Imaging))
        {
            tracing::debug!("duplicate LocationsReady, image already recorded");
            return Ok(());
        }

        let outcome = match self
            .provider
            .find_image(&data.destination_address, data.destination_coordinates)
            .await
        {
            Ok(Some(image)) => BranchOutcome::ok(image),
            Ok(None) => BranchOutcome::empty(),
            Err(ProviderError::Transient(msg)) => return Err(HandlerError::Transient(msg)),
            Err(ProviderError::Permanent(msg)) => {
                metrics::counter!("branch_failures_total", "branch" => "imaging").increment(1);
                tracing::warn!(reason = %msg, "image lookup failed");
                BranchOutcome::failed(msg)
            }
        };

        let event = TravelEvent::image_ready(job_id, outcome);
        self.bus
            .publish(event.to_envelope().map_err(|e| {
                HandlerError::Permanent(format!("unencodable ImageReady: {e}"))
            })?)
            .await
            .map_err(publish_error)?;

        metrics::counter!("branch_results_total", "branch" => "imaging").increment(1);
        Ok(())
    }

    async fn on_dead_letter(&self, envelope: &EventEnvelope, error: &HandlerError) {
        let event = TravelEvent::image_ready(
            envelope.correlation_id,
            BranchOutcome::failed(format!("imaging branch gave up: {error}")),
        );
        match event.to_envelope() {
            Ok(envelope) => {
                if let Err(e) = self.bus.publish(envelope).await {
                    tracing::error!(error = %e, "failed to publish failed imaging result");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to encode failed imaging result"),
        }
    }
}
