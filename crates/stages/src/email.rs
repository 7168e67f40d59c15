//! Email stage: `ProcessingComplete` in, job `Sent` (or `Failed`) out.

use async_trait::async_trait;
use domain::{JobStatus, ProcessingCompleteData, TravelEvent};
use event_bus::{EventBus, EventEnvelope, EventHandler, HandlerError};
use registry::{JobRegistry, JobStore};

use crate::providers::{EmailSender, ProviderError};
use crate::stage::{parse_event, registry_error};

pub use crate::providers::email::TripSummary;

/// Assembles the plain-text summary from the three branch outcomes.
///
/// A failed branch shows up as a note in the body, not as a missing email:
/// the job still completes, only the content reflects the failure.
pub fn render_summary(data: &ProcessingCompleteData) -> TripSummary {
    let mut lines = vec![format!(
        "Here is your trip plan from {} to {}.",
        data.starting_address, data.destination_address
    )];

    match (&data.directions.payload, data.directions.success) {
        (Some(route), _) => lines.push(format!(
            "Route: {} ({:.1} km, about {} min).",
            route.summary,
            route.distance_meters as f64 / 1000.0,
            route.duration_seconds / 60
        )),
        (None, true) => lines.push("Route: no route details available.".to_string()),
        (None, false) => lines.push(format!(
            "Route: unavailable ({}).",
            data.directions.detail.as_deref().unwrap_or("unknown error")
        )),
    }

    match (&data.weather.payload, data.weather.success) {
        (Some(forecast), _) => lines.push(format!(
            "Weather at the destination: {}, {:.0}°C.",
            forecast.description, forecast.temperature_celsius
        )),
        (None, true) => lines.push("Weather at the destination: no forecast available.".to_string()),
        (None, false) => lines.push(format!(
            "Weather at the destination: unavailable ({}).",
            data.weather.detail.as_deref().unwrap_or("unknown error")
        )),
    }

    match (&data.imaging.payload, data.imaging.success) {
        (Some(image), _) => lines.push(format!("A picture of your destination: {}", image.url)),
        (None, true) => lines.push("No picture of your destination was found.".to_string()),
        (None, false) => lines.push(format!(
            "Destination picture: unavailable ({}).",
            data.imaging.detail.as_deref().unwrap_or("unknown error")
        )),
    }

    TripSummary {
        job_id: data.job_id,
        recipient: data.email.clone(),
        subject: format!(
            "Your trip from {} to {}",
            data.starting_address, data.destination_address
        ),
        body: lines.join("\n"),
    }
}

/// Sends the combined summary once all three branches are in.
///
/// The `Complete -> Sent` transition commits only after the sender
/// accepted the message; a permanent send failure moves the job to
/// `Failed` instead, and transient failures ride the bus's retry policy.
pub struct EmailStage<S, B, E>
where
    S: JobStore,
    B: EventBus,
    E: EmailSender,
{
    registry: JobRegistry<S, B>,
    sender: E,
}

impl<S, B, E> EmailStage<S, B, E>
where
    S: JobStore,
    B: EventBus,
    E: EmailSender,
{
    /// Creates the stage.
    pub fn new(registry: JobRegistry<S, B>, sender: E) -> Self {
        Self { registry, sender }
    }
}

#[async_trait]
impl<S, B, E> EventHandler for EmailStage<S, B, E>
where
    S: JobStore,
    B: EventBus,
    E: EmailSender,
{
    fn name(&self) -> &'static str {
        "email"
    }

    #[tracing::instrument(skip(self, envelope), fields(job_id = %envelope.correlation_id))]
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let TravelEvent::ProcessingComplete(data) = parse_event(envelope)? else {
            return Err(HandlerError::Permanent(format!(
                "email stage received '{}'",
                envelope.event_type
            )));
        };
        let job_id = data.job_id;

        let job = self
            .registry
            .get(job_id)
            .await
            .map_err(registry_error)?
            .ok_or_else(|| HandlerError::Permanent(format!("job not found: {job_id}")))?;

        if job.status != JobStatus::Complete {
            tracing::debug!(status = %job.status, "duplicate ProcessingComplete, skipping");
            return Ok(());
        }

        let summary = render_summary(&data);
        match self.sender.send(&summary).await {
            Ok(()) => {
                self.registry
                    .advance(job_id, JobStatus::Complete, JobStatus::Sent, None)
                    .await
                    .map_err(registry_error)?;
                metrics::counter!("emails_sent_total").increment(1);
                tracing::info!(recipient = %summary.recipient, "trip summary sent");
                Ok(())
            }
            Err(ProviderError::Transient(msg)) => Err(HandlerError::Transient(msg)),
            Err(ProviderError::Permanent(msg)) => {
                self.registry
                    .fail(job_id, format!("email send failed: {msg}"))
                    .await
                    .map_err(registry_error)?;
                metrics::counter!("emails_failed_total").increment(1);
                Ok(())
            }
        }
    }

    async fn on_dead_letter(&self, envelope: &EventEnvelope, error: &HandlerError) {
        let job_id = envelope.correlation_id;
        if let Err(e) = self
            .registry
            .fail(job_id, format!("email delivery gave up: {error}"))
            .await
        {
            tracing::error!(%job_id, error = %e, "failed to mark job failed after dead letter");
        }
    }
}
