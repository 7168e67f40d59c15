//! Fan-in barrier: three partial results in, one `ProcessingComplete` out.

use async_trait::async_trait;
use common::JobId;
use domain::{
    DomainEvent, JobStatus, PartialResult, ProcessingCompleteData, TravelEvent,
};
use event_bus::{EventBus, EventEnvelope, EventHandler, HandlerError};
use registry::{
    AggregationRecord, AggregationStore, DuplicatePolicy, JobRegistry, JobStore, RegistryError,
};

use crate::stage::{parse_event, registry_error};

/// Tracks which of the three branches have reported for each job and
/// publishes `ProcessingComplete` exactly once when all three are in.
///
/// Every mutation is a version-checked compare-and-swap on the aggregation
/// record; the `completed` flag flips in the same write as the third
/// arrival, so of any number of consumers racing on near-simultaneous
/// branch results, exactly one observes the record crossing the threshold
/// and publishes. Duplicate arrivals are recognized by kind and never
/// recounted, before or after completion.
#[derive(Clone)]
pub struct FanInAggregator<A, S, B>
where
    A: AggregationStore,
    S: JobStore,
    B: EventBus,
{
    aggregation: A,
    registry: JobRegistry<S, B>,
    bus: B,
    policy: DuplicatePolicy,
}

impl<A, S, B> FanInAggregator<A, S, B>
where
    A: AggregationStore,
    S: JobStore,
    B: EventBus,
{
    /// Creates the aggregator with the default duplicate policy.
    pub fn new(aggregation: A, registry: JobRegistry<S, B>, bus: B) -> Self {
        Self::with_policy(aggregation, registry, bus, DuplicatePolicy::default())
    }

    /// Creates the aggregator with an explicit duplicate policy.
    pub fn with_policy(
        aggregation: A,
        registry: JobRegistry<S, B>,
        bus: B,
        policy: DuplicatePolicy,
    ) -> Self {
        Self {
            aggregation,
            registry,
            bus,
            policy,
        }
    }

    /// Records one partial result for a job.
    ///
    /// Returns true if this call published the completion event.
    #[tracing::instrument(skip(self, result), fields(kind = %result.kind()))]
    pub async fn record_partial_result(
        &self,
        job_id: JobId,
        result: PartialResult,
    ) -> Result<bool, RegistryError> {
        loop {
            let record = self.aggregation.fetch_or_create(job_id).await?;

            if record.completed {
                metrics::counter!("aggregator_discarded_total").increment(1);
                tracing::debug!("partial result after completion, discarding");
                // A previous completion may have crashed between the record
                // CAS and the follow-on publish; re-driving it is safe since
                // the job transition below is a CAS of its own.
                return self.publish_completion(&record).await;
            }

            let mut updated = record.clone();
            let newly_arrived = updated.record(result.clone(), self.policy);

            if !newly_arrived && self.policy == DuplicatePolicy::KeepFirst {
                metrics::counter!("aggregator_discarded_total").increment(1);
                tracing::debug!("duplicate partial result, keeping first");
                return Ok(false);
            }

            let fires = newly_arrived && updated.is_complete();
            if fires {
                updated.completed = true;
            }

            match self.aggregation.update(updated, record.version).await {
                Ok(committed) => {
                    metrics::counter!("aggregator_recorded_total").increment(1);
                    if fires {
                        return self.publish_completion(&committed).await;
                    }
                    return Ok(false);
                }
                Err(RegistryError::ConcurrencyConflict { .. }) => {
                    // Another branch result landed first; re-read and retry.
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Publishes `ProcessingComplete` for a completed record.
    ///
    /// Runs after the completing CAS commits: the record is the handler's
    /// own state, and the follow-on event must never precede it. The
    /// `AwaitingParallelResults -> Complete` job transition gates the
    /// publish, so of all callers observing a completed record exactly the
    /// one that wins that CAS publishes. Returns true for that caller.
    async fn publish_completion(&self, record: &AggregationRecord) -> Result<bool, RegistryError> {
        let job = self
            .registry
            .get(record.job_id)
            .await?
            .ok_or(RegistryError::NotFound(record.job_id))?;

        let transition = self
            .registry
            .advance(
                job.id,
                JobStatus::AwaitingParallelResults,
                JobStatus::Complete,
                None,
            )
            .await?;
        if !transition.applied() {
            return Ok(false);
        }

        let Some((directions, weather, imaging)) = record.outcomes() else {
            // A completed record always holds all three entries.
            return Ok(false);
        };

        let event = TravelEvent::ProcessingComplete(ProcessingCompleteData {
            job_id: job.id,
            email: job.email,
            starting_address: job.starting_address,
            destination_address: job.destination_address,
            directions,
            weather,
            imaging,
        });
        self.bus.publish(event.to_envelope()?).await?;

        metrics::counter!("jobs_aggregated_total").increment(1);
        tracing::info!(job_id = %record.job_id, "all branches in, processing complete");
        Ok(true)
    }
}

#[async_trait]
impl<A, S, B> EventHandler for FanInAggregator<A, S, B>
where
    A: AggregationStore,
    S: JobStore,
    B: EventBus,
{
    fn name(&self) -> &'static str {
        "fan-in-aggregator"
    }

    #[tracing::instrument(skip(self, envelope), fields(job_id = %envelope.correlation_id))]
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let (job_id, result) = match parse_event(envelope)? {
            TravelEvent::DirectionsReady(data) => {
                (data.job_id, PartialResult::Directions(data.outcome))
            }
            TravelEvent::WeatherReady(data) => (data.job_id, PartialResult::Weather(data.outcome)),
            TravelEvent::ImageReady(data) => (data.job_id, PartialResult::Imaging(data.outcome)),
            other => {
                return Err(HandlerError::Permanent(format!(
                    "aggregator received '{}'",
                    other.event_type()
                )));
            }
        };

        self.record_partial_result(job_id, result)
            .await
            .map_err(registry_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use domain::{BranchOutcome, Forecast, ImageReference, Job, RoutePlan};
    use event_bus::{InMemoryEventBus, SubscribeOptions};
    use futures_util::future::join_all;
    use registry::{InMemoryAggregationStore, InMemoryJobStore};

    use super::*;

    type TestAggregator =
        FanInAggregator<InMemoryAggregationStore, InMemoryJobStore, InMemoryEventBus>;

    struct CompletionCounter {
        count: Arc<AtomicU32>,
    }

    #[async_trait]
    impl EventHandler for CompletionCounter {
        fn name(&self) -> &'static str {
            "completion-counter"
        }

        async fn handle(&self, _envelope: &EventEnvelope) -> Result<(), HandlerError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn setup() -> (TestAggregator, InMemoryJobStore, JobId, Arc<AtomicU32>) {
        let store = InMemoryJobStore::new();
        let aggregation = InMemoryAggregationStore::new();
        let bus = InMemoryEventBus::new();
        let registry = JobRegistry::new(store.clone(), bus.clone());

        let count = Arc::new(AtomicU32::new(0));
        bus.subscribe(
            domain::topics::PROCESSING_COMPLETE,
            "test",
            Arc::new(CompletionCounter { count: count.clone() }),
            SubscribeOptions::default(),
        )
        .await
        .unwrap();

        // Seed a job already at the fan-out point.
        let mut job = Job::new("key-1", "Berlin", "Munich", "x@example.com");
        job.status = JobStatus::AwaitingParallelResults;
        let job = store.insert(job).await.unwrap();

        let aggregator = FanInAggregator::new(aggregation, registry, bus);
        (aggregator, store, job.id, count)
    }

    fn directions() -> PartialResult {
        PartialResult::Directions(BranchOutcome::ok(RoutePlan {
            summary: "Berlin to Munich".into(),
            distance_meters: 585_000,
            duration_seconds: 21_000,
            steps: vec![],
        }))
    }

    fn weather() -> PartialResult {
        PartialResult::Weather(BranchOutcome::ok(Forecast {
            description: "clear".into(),
            temperature_celsius: 19.0,
        }))
    }

    fn imaging() -> PartialResult {
        PartialResult::Imaging(BranchOutcome::ok(ImageReference {
            url: "https://images.example/munich.jpg".into(),
            attribution: None,
        }))
    }

    async fn settle(count: &Arc<AtomicU32>, expect: u32) {
        for _ in 0..400 {
            if count.load(Ordering::SeqCst) >= expect {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Allow any extra (erroneous) publications to land before asserting.
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn completes_after_all_three_kinds_in_any_order() {
        let (aggregator, store, job_id, count) = setup().await;

        assert!(!aggregator.record_partial_result(job_id, imaging()).await.unwrap());
        assert!(!aggregator.record_partial_result(job_id, directions()).await.unwrap());
        assert!(aggregator.record_partial_result(job_id, weather()).await.unwrap());

        settle(&count, 1).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let job = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn two_kinds_do_not_complete() {
        let (aggregator, store, job_id, count) = setup().await;

        aggregator.record_partial_result(job_id, directions()).await.unwrap();
        aggregator.record_partial_result(job_id, weather()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let job = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::AwaitingParallelResults);
    }

    #[tokio::test]
    async fn duplicates_before_completion_are_not_recounted() {
        let (aggregator, _store, job_id, count) = setup().await;

        aggregator.record_partial_result(job_id, directions()).await.unwrap();
        aggregator.record_partial_result(job_id, directions()).await.unwrap();
        aggregator.record_partial_result(job_id, directions()).await.unwrap();
        aggregator.record_partial_result(job_id, weather()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duplicates_after_completion_are_discarded() {
        let (aggregator, _store, job_id, count) = setup().await;

        aggregator.record_partial_result(job_id, directions()).await.unwrap();
        aggregator.record_partial_result(job_id, weather()).await.unwrap();
        aggregator.record_partial_result(job_id, imaging()).await.unwrap();

        // Redeliver everything.
        assert!(!aggregator.record_partial_result(job_id, directions()).await.unwrap());
        assert!(!aggregator.record_partial_result(job_id, weather()).await.unwrap());
        assert!(!aggregator.record_partial_result(job_id, imaging()).await.unwrap());

        settle(&count, 1).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_arrivals_publish_exactly_once() {
        let (aggregator, _store, job_id, count) = setup().await;

        let tasks = vec![
            (aggregator.clone(), directions()),
            (aggregator.clone(), weather()),
            (aggregator.clone(), imaging()),
            // Duplicates racing alongside the originals.
            (aggregator.clone(), directions()),
            (aggregator.clone(), weather()),
            (aggregator.clone(), imaging()),
        ];

        let fired: Vec<bool> = join_all(tasks.into_iter().map(|(agg, result)| async move {
            agg.record_partial_result(job_id, result).await.unwrap()
        }))
        .await;

        assert_eq!(fired.iter().filter(|f| **f).count(), 1);

        settle(&count, 1).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_branch_still_counts_toward_completion() {
        let (aggregator, store, job_id, count) = setup().await;

        aggregator
            .record_partial_result(
                job_id,
                PartialResult::Directions(BranchOutcome::failed("no route")),
            )
            .await
            .unwrap();
        aggregator.record_partial_result(job_id, weather()).await.unwrap();
        let fired = aggregator.record_partial_result(job_id, imaging()).await.unwrap();
        assert!(fired);

        settle(&count, 1).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let job = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn handler_routes_branch_events() {
        let (aggregator, store, job_id, count) = setup().await;

        let events = [
            TravelEvent::directions_ready(
                job_id,
                BranchOutcome::ok(RoutePlan {
                    summary: "r".into(),
                    distance_meters: 1,
                    duration_seconds: 1,
                    steps: vec![],
                }),
            ),
            TravelEvent::weather_ready(
                job_id,
                BranchOutcome::ok(Forecast {
                    description: "clear".into(),
                    temperature_celsius: 20.0,
                }),
            ),
            TravelEvent::image_ready(job_id, BranchOutcome::empty()),
        ];
        for event in &events {
            aggregator.handle(&event.to_envelope().unwrap()).await.unwrap();
        }

        settle(&count, 1).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let job = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn keep_latest_policy_overwrites_without_recounting() {
        let store = InMemoryJobStore::new();
        let aggregation = InMemoryAggregationStore::new();
        let bus = InMemoryEventBus::new();
        let registry = JobRegistry::new(store.clone(), bus.clone());

        let mut job = Job::new("key-1", "A", "B", "x@example.com");
        job.status = JobStatus::AwaitingParallelResults;
        let job = store.insert(job).await.unwrap();

        let aggregator = FanInAggregator::with_policy(
            aggregation.clone(),
            registry,
            bus,
            DuplicatePolicy::KeepLatest,
        );

        aggregator
            .record_partial_result(job.id, PartialResult::Weather(BranchOutcome::failed("first")))
            .await
            .unwrap();
        aggregator
            .record_partial_result(job.id, weather())
            .await
            .unwrap();

        let record = aggregation.get(job.id).await.unwrap().unwrap();
        assert!(record.weather.as_ref().unwrap().success);
        assert!(!record.is_complete());
    }
}
