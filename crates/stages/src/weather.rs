//! Weather branch: `LocationsReady` in, `WeatherReady` out.

use async_trait::async_trait;
use domain::{BranchKind, BranchOutcome, TravelEvent};
use event_bus::{EventBus, EventEnvelope, EventHandler, HandlerError};
use registry::AggregationStore;

use crate::providers::{ProviderError, WeatherProvider};
use crate::stage::{parse_event, publish_error, registry_error};

/// Fetches the destination forecast for a job.
///
/// Same contract as the other branches: one `WeatherReady` per job, with
/// provider failures encoded in the outcome rather than dropped.
pub struct WeatherStage<A, B, P>
where
    A: AggregationStore,
    B: EventBus,
    P: WeatherProvider,
{
    aggregation: A,
    bus: B,
    provider: P,
}

impl<A, B, P> WeatherStage<A, B, P>
where
    A: AggregationStore,
    B: EventBus,
    P: WeatherProvider,
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
impl<A, B, P> EventHandler for WeatherStage<A, B, P>
where
    A: AggregationStore,
    B: EventBus,
    P: WeatherProvider,
{
    fn name(&self) -> &'static str {
        "weather"
    }

    #[tracing::instrument(skip(self, envelope), fields(job_id = %envelope.correlation_id))]
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let TravelEvent::LocationsReady(data) = parse_event(envelope)? else {
            return Err(HandlerError::Permanent(format!(
                "weather stage received '{}'",
                envelope.event_type
            )));
        };
        let job_id = data.job_id;

        if let Some(record) = self.aggregation.get(job_id).await.map_err(registry_error)?
            && (record.completed || record.has(BranchKind::Weather))
        {
            tracing::debug!("duplicate LocationsReady, weather already recorded");
            return Ok(());
        }

        let outcome = match self.provider.forecast(data.destination_coordinates).await {
            Ok(forecast) => BranchOutcome::ok(forecast),
            Err(ProviderError::Transient(msg)) => return Err(HandlerError::Transient(msg)),
            Err(ProviderError::Permanent(msg)) => {
                metrics::counter!("branch_failures_total", "branch" => "weather").increment(1);
                tracing::warn!(reason = %msg, "weather lookup failed");
                BranchOutcome::failed(msg)
            }
        };

        let event = TravelEvent::weather_ready(job_id, outcome);
        self.bus
            .publish(event.to_envelope().map_err(|e| {
                HandlerError::Permanent(format!("unencodable WeatherReady: {e}"))
            })?)
            .await
            .map_err(publish_error)?;

        metrics::counter!("branch_results_total", "branch" => "weather").increment(1);
        Ok(())
    }

    async fn on_dead_letter(&self, envelope: &EventEnvelope, error: &HandlerError) {
        let event = TravelEvent::weather_ready(
            envelope.correlation_id,
            BranchOutcome::failed(format!("weather branch gave up: {error}")),
        );
        match event.to_envelope() {
            Ok(envelope) => {
                if let Err(e) = self.bus.publish(envelope).await {
                    tracing::error!(error = %e, "failed to publish failed weather result");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to encode failed weather result"),
        }
    }
}
