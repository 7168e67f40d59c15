//! Cache invalidation driven by `JobStatusUpdate` events.

use async_trait::async_trait;
use cache::Cache;
use domain::{Job, TravelEvent};
use event_bus::{EventEnvelope, EventHandler, HandlerError};
use registry::JobStore;

use crate::status::StatusQuery;

/// Consumes `JobStatusUpdate` and drops the corresponding cache entry.
///
/// Every registry write publishes a status event, so wiring this consumer
/// bounds reader staleness to the delivery latency of one event.
pub struct StatusCacheInvalidator<S, C>
where
    S: JobStore,
    C: Cache<Job>,
{
    query: StatusQuery<S, C>,
}

impl<S, C> StatusCacheInvalidator<S, C>
where
    S: JobStore,
    C: Cache<Job>,
{
    /// Creates the invalidator over the same query service readers use.
    pub fn new(query: StatusQuery<S, C>) -> Self {
        Self { query }
    }
}

#[async_trait]
impl<S, C> EventHandler for StatusCacheInvalidator<S, C>
where
    S: JobStore,
    C: Cache<Job>,
{
    fn name(&self) -> &'static str {
        "status-cache-invalidator"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let TravelEvent::JobStatusUpdate(data) = TravelEvent::from_envelope(envelope)
            .map_err(|e| HandlerError::Permanent(format!("undecodable event payload: {e}")))?
        else {
            return Err(HandlerError::Permanent(format!(
                "invalidator received '{}'",
                envelope.event_type
            )));
        };

        self.query.invalidate(data.job_id).await;
        metrics::counter!("status_cache_invalidations_total").increment(1);
        tracing::debug!(job_id = %data.job_id, status = %data.status, "status cache invalidated");
        Ok(())
    }
}
