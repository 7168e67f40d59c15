//! Directions branch: `LocationsReady` in, `DirectionsReady` out.

use async_trait::async_trait;
use domain::{BranchKind, BranchOutcome, TravelEvent};
use event_bus::{EventBus, EventEnvelope, EventHandler, HandlerError};
use registry::AggregationStore;

use crate::providers::{DirectionsProvider, ProviderError};
use crate::stage::{parse_event, publish_error, registry_error};

/// Computes driving directions for a job.
///
/// Always publishes a `DirectionsReady` event, even when the provider
/// fails permanently: the fan-in barrier needs exactly one signal per kind
/// per job, and a swallowed failure would stall it forever. Only transient
/// failures bounce back to the bus for redelivery.
pub struct DirectionsStage<A, B, P>
where
    A: AggregationStore,
    B: EventBus,
    P: DirectionsProvider,
{
    aggregation: A,
    bus: B,
    provider: P,
}

impl<A, B, P> DirectionsStage<A, B, P>
where
    A: AggregationStore,
    B: EventBus,
    P: DirectionsProvider,
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
impl<A, B, P> EventHandler for DirectionsStage<A, B, P>
where
    A: AggregationStore,
    B: EventBus,
    P: DirectionsProvider,
{
    fn name(&self) -> &'static str {
        "directions"
    }

    #[tracing::instrument(skip(self, envelope), fields(job_id = %envelope.correlation_id))]
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let TravelEvent::LocationsReady(data) = parse_event(envelope)? else {
            return Err(HandlerError::Permanent(format!(
                "directions stage received '{}'",
                envelope.event_type
            )));
        };
        let job_id = data.job_id;

        // Duplicate delivery: the aggregation record already has our kind.
        if let Some(record) = self.aggregation.get(job_id).await.map_err(registry_error)?
            && (record.completed || record.has(BranchKind::Directions))
        {
            tracing::debug!("duplicate LocationsReady, directions already recorded");
            return Ok(());
        }

        let outcome = match self
            .provider
            .plan_route(data.starting_coordinates, data.destination_coordinates)
            .await
        {
            Ok(plan) => BranchOutcome::ok(plan),
            Err(ProviderError::Transient(msg)) => return Err(HandlerError::Transient(msg)),
            Err(ProviderError::Permanent(msg)) => {
                metrics::counter!("branch_failures_total", "branch" => "directions").increment(1);
                tracing::warn!(reason = %msg, "directions lookup failed");
                BranchOutcome::failed(msg)
            }
        };

        let event = TravelEvent::directions_ready(job_id, outcome);
        self.bus
            .publish(event.to_envelope().map_err(|e| {
                HandlerError::Permanent(format!("unencodable DirectionsReady: {e}"))
            })?)
            .await
            .map_err(publish_error)?;

        metrics::counter!("branch_results_total", "branch" => "directions").increment(1);
        Ok(())
    }

    async fn on_dead_letter(&self, envelope: &EventEnvelope, error: &HandlerError) {
        // Exhausted retries still owe the barrier a signal.
        let event = TravelEvent::directions_ready(
            envelope.correlation_id,
            BranchOutcome::failed(format!("directions branch gave up: {error}")),
        );
        match event.to_envelope() {
            Ok(envelope) => {
                if let Err(e) = self.bus.publish(envelope).await {
                    tracing::error!(error = %e, "failed to publish failed directions result");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to encode failed directions result"),
        }
    }
}
