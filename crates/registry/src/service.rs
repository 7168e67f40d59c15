//! Idempotent status transitions over the job store.

use common::JobId;
use domain::{Job, JobStatus, TravelEvent};
use event_bus::EventBus;

use crate::error::{RegistryError, Result};
use crate::store::JobStore;

/// Outcome of an idempotent transition attempt.
#[derive(Debug)]
pub enum Transition {
    /// The transition was committed by this call.
    Applied(Job),
    /// The registry already reflects this transition (or a later one);
    /// the triggering delivery is a duplicate.
    AlreadyApplied(Job),
}

impl Transition {
    /// Returns the job as observed after the attempt.
    pub fn job(&self) -> &Job {
        match self {
            Transition::Applied(job) | Transition::AlreadyApplied(job) => job,
        }
    }

    /// Returns true if this call committed the transition.
    pub fn applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

/// Write-side service over the job store.
///
/// Every committed transition also publishes a `JobStatusUpdate` event, after
/// the store write, never before. Conflicting concurrent writers re-fetch and
/// re-evaluate, so a transition is applied at most once no matter how many
/// consumer instances race on the same delivery.
#[derive(Clone)]
pub struct JobRegistry<S, B>
where
    S: JobStore,
    B: EventBus,
{
    store: S,
    bus: B,
}

impl<S, B> JobRegistry<S, B>
where
    S: JobStore,
    B: EventBus,
{
    /// Creates a new registry service.
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads a job by id.
    pub async fn get(&self, job_id: JobId) -> Result<Option<Job>> {
        self.store.get(job_id).await
    }

    /// Attempts the `expected -> next` transition for a job.
    ///
    /// Re-delivered events resolve to `AlreadyApplied` when the job is
    /// already at or past `next`; a status otherwise inconsistent with the
    /// transition is treated the same way (the triggering event was
    /// processed by someone else).
    #[tracing::instrument(skip(self, detail))]
    pub async fn advance(
        &self,
        job_id: JobId,
        expected: JobStatus,
        next: JobStatus,
        detail: Option<String>,
    ) -> Result<Transition> {
        loop {
            let job = self
                .store
                .get(job_id)
                .await?
                .ok_or(RegistryError::NotFound(job_id))?;

            if job.status.rank() >= next.rank() {
                return Ok(Transition::AlreadyApplied(job));
            }
            if job.status != expected || !job.status.can_advance_to(next) {
                tracing::debug!(
                    %job_id,
                    status = %job.status,
                    expected = %expected,
                    next = %next,
                    "status inconsistent with transition, treating as already processed"
                );
                return Ok(Transition::AlreadyApplied(job));
            }

            let mut updated = job.clone();
            updated.status = next;
            if detail.is_some() {
                updated.additional_information = detail.clone();
            }

            match self.store.update(updated, job.version).await {
                Ok(committed) => {
                    metrics::counter!("job_transitions_total", "to" => next.as_str()).increment(1);
                    tracing::info!(%job_id, from = %expected, to = %next, "job transitioned");
                    self.publish_status(&committed).await?;
                    return Ok(Transition::Applied(committed));
                }
                Err(RegistryError::ConcurrencyConflict { .. }) => {
                    // Another consumer instance won; re-fetch and re-evaluate.
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Moves a job to `Failed` from any non-terminal status.
    #[tracing::instrument(skip(self, detail))]
    pub async fn fail(&self, job_id: JobId, detail: impl Into<String> + std::fmt::Debug) -> Result<Transition> {
        let detail = detail.into();
        loop {
            let job = self
                .store
                .get(job_id)
                .await?
                .ok_or(RegistryError::NotFound(job_id))?;

            if job.is_terminal() {
                return Ok(Transition::AlreadyApplied(job));
            }

            let mut updated = job.clone();
            updated.status = JobStatus::Failed;
            updated.additional_information = Some(detail.clone());

            match self.store.update(updated, job.version).await {
                Ok(committed) => {
                    metrics::counter!("job_transitions_total", "to" => "Failed").increment(1);
                    tracing::warn!(%job_id, reason = %detail, "job failed");
                    self.publish_status(&committed).await?;
                    return Ok(Transition::Applied(committed));
                }
                Err(RegistryError::ConcurrencyConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Publishes the status event for a committed transition.
    async fn publish_status(&self, job: &Job) -> Result<()> {
        let event = TravelEvent::status_update(
            job.id,
            job.status,
            job.additional_information.clone(),
        );
        self.bus.publish(event.to_envelope()?).await?;
        Ok(())
    }
}
