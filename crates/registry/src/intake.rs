//! Idempotent job intake.

use common::JobId;
use domain::{Job, TravelEvent};
use event_bus::EventBus;

use crate::error::{RegistryError, Result};
use crate::store::JobStore;

/// Accepts job-creation requests and deduplicates them by the
/// caller-supplied idempotency key.
///
/// For a fixed key exactly one job exists and exactly one `JobCreated`
/// event is ever published, no matter how often the request is retried or
/// how many callers race: the store's unique-constraint insert picks a
/// single winner, and only the winner publishes.
#[derive(Clone)]
pub struct JobIntake<S, B>
where
    S: JobStore,
    B: EventBus,
{
    store: S,
    bus: B,
}

impl<S, B> JobIntake<S, B>
where
    S: JobStore,
    B: EventBus,
{
    /// Creates a new intake service.
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    /// Creates a job, or returns the existing job for the key.
    ///
    /// Input is expected to be already validated by the API layer.
    #[tracing::instrument(skip(self))]
    pub async fn create_job(
        &self,
        idempotency_key: &str,
        starting_address: &str,
        destination_address: &str,
        email: &str,
    ) -> Result<JobId> {
        if let Some(existing) = self.store.find_by_idempotency_key(idempotency_key).await? {
            metrics::counter!("intake_deduplicated_total").increment(1);
            tracing::info!(job_id = %existing.id, idempotency_key, "duplicate create request");
            return Ok(existing.id);
        }

        let job = Job::new(idempotency_key, starting_address, destination_address, email);

        let inserted = match self.store.insert(job).await {
            Ok(job) => job,
            Err(RegistryError::IdempotencyKeyTaken { existing, .. }) => {
                // Lost the race; the winner publishes JobCreated.
                metrics::counter!("intake_deduplicated_total").increment(1);
                tracing::info!(job_id = %existing, idempotency_key, "lost creation race");
                return Ok(existing);
            }
            Err(e) => return Err(e),
        };

        let created = TravelEvent::job_created(
            inserted.id,
            &inserted.starting_address,
            &inserted.destination_address,
            &inserted.email,
        );
        self.bus.publish(created.to_envelope()?).await?;

        let status = TravelEvent::status_update(inserted.id, inserted.status, None);
        self.bus.publish(status.to_envelope()?).await?;

        metrics::counter!("jobs_created_total").increment(1);
        tracing::info!(job_id = %inserted.id, idempotency_key, "job created");
        Ok(inserted.id)
    }
}
