use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, Semaphore, mpsc};

use crate::bus::{EventBus, EventHandler, HandlerError, SubscribeOptions};
use crate::envelope::EventEnvelope;
use crate::error::{BusError, Result};

/// A delivery that exhausted its retries or failed permanently.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The envelope that could not be processed.
    pub envelope: EventEnvelope,
    /// The consumer group whose handler failed.
    pub group: String,
    /// The handler's name.
    pub handler: &'static str,
    /// The final error message.
    pub error: String,
    /// Number of delivery attempts made.
    pub attempts: u32,
}

#[derive(Default)]
struct TopicState {
    groups: HashMap<String, mpsc::UnboundedSender<EventEnvelope>>,
    /// Publishes that arrived before any group subscribed; flushed to the
    /// first subscriber of the topic.
    retained: Vec<EventEnvelope>,
}

/// In-memory event bus implementation.
///
/// Provides the same interface and delivery semantics as a durable broker:
/// fan-out across consumer groups, queue semantics within a group,
/// at-least-once delivery with bounded retry/backoff, a dead-letter queue,
/// and per-subscription admission control. State lives in process memory,
/// so durability ends with the process; production deployments put a real
/// broker behind the [`EventBus`] trait.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    topics: Arc<RwLock<HashMap<String, TopicState>>>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    closed: Arc<AtomicBool>,
}

impl InMemoryEventBus {
    /// Creates a new empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the dead-letter queue.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().await.clone()
    }

    /// Closes the bus: subsequent publishes fail and dispatch loops end
    /// once in-flight deliveries finish.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut topics = self.topics.write().await;
        for state in topics.values_mut() {
            state.groups.clear();
        }
    }

    fn spawn_dispatch_loop(
        &self,
        mut rx: mpsc::UnboundedReceiver<EventEnvelope>,
        group: String,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) {
        let dead_letters = Arc::clone(&self.dead_letters);
        let semaphore = Arc::new(Semaphore::new(options.max_in_flight.max(1)));

        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                let handler = Arc::clone(&handler);
                let dead_letters = Arc::clone(&dead_letters);
                let options = options.clone();
                let group = group.clone();

                tokio::spawn(async move {
                    deliver(handler, envelope, options, dead_letters, group).await;
                    drop(permit);
                });
            }
        });
    }
}

/// Runs the attempt loop for one delivery.
async fn deliver(
    handler: Arc<dyn EventHandler>,
    envelope: EventEnvelope,
    options: SubscribeOptions,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    group: String,
) {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        metrics::counter!("bus_deliveries_total").increment(1);

        let outcome =
            match tokio::time::timeout(options.handler_timeout, handler.handle(&envelope)).await {
                Ok(result) => result,
                Err(_) => Err(HandlerError::Transient(format!(
                    "handler '{}' timed out",
                    handler.name()
                ))),
            };

        match outcome {
            Ok(()) => {
                tracing::debug!(
                    event_type = %envelope.event_type,
                    job_id = %envelope.correlation_id,
                    group = %group,
                    attempt,
                    "delivery acknowledged"
                );
                return;
            }
            Err(error) if error.is_transient() && attempt < options.retry.max_attempts => {
                metrics::counter!("bus_retries_total").increment(1);
                tracing::debug!(
                    event_type = %envelope.event_type,
                    job_id = %envelope.correlation_id,
                    group = %group,
                    attempt,
                    %error,
                    "delivery failed, retrying"
                );
                tokio::time::sleep(options.retry.delay_for(attempt)).await;
            }
            Err(error) => {
                metrics::counter!("bus_dead_letters_total").increment(1);
                tracing::warn!(
                    event_type = %envelope.event_type,
                    job_id = %envelope.correlation_id,
                    group = %group,
                    handler = handler.name(),
                    attempts = attempt,
                    %error,
                    "delivery dead-lettered"
                );
                dead_letters.lock().await.push(DeadLetter {
                    envelope: envelope.clone(),
                    group,
                    handler: handler.name(),
                    error: error.to_string(),
                    attempts: attempt,
                });
                handler.on_dead_letter(&envelope, &error).await;
                return;
            }
        }
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, envelope: EventEnvelope) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        metrics::counter!("bus_events_published").increment(1);

        let mut topics = self.topics.write().await;
        let state = topics.entry(envelope.event_type.clone()).or_default();

        if state.groups.is_empty() {
            state.retained.push(envelope);
            return Ok(());
        }

        for tx in state.groups.values() {
            // A send error means the dispatch loop is gone; the bus is
            // closing, so the delivery is dropped deliberately.
            let _ = tx.send(envelope.clone());
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let mut topics = self.topics.write().await;
        let state = topics.entry(topic.to_string()).or_default();

        if state.groups.contains_key(group) {
            return Err(BusError::DuplicateSubscription {
                topic: topic.to_string(),
                group: group.to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();

        // The first subscriber drains anything published before the topic
        // had consumers.
        if state.groups.is_empty() {
            for envelope in state.retained.drain(..) {
                let _ = tx.send(envelope);
            }
        }

        state.groups.insert(group.to_string(), tx);
        tracing::info!(topic, group, handler = handler.name(), "consumer subscribed");

        self.spawn_dispatch_loop(rx, group.to_string(), handler, options);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, AtomicUsize};
    use std::time::Duration;

    use common::JobId;

    use super::*;
    use crate::retry::RetryPolicy;

    fn test_envelope() -> EventEnvelope {
        EventEnvelope::builder()
            .event_type("TestEvent")
            .correlation_id(JobId::new())
            .payload_raw(serde_json::json!({"test": true}))
            .build()
    }

    /// Handler that fails transiently a configured number of times,
    /// then succeeds.
    struct FlakyHandler {
        calls: Arc<AtomicU32>,
        failures: u32,
        permanent: bool,
        dead_lettered: Arc<AtomicU32>,
    }

    impl FlakyHandler {
        fn new(failures: u32, permanent: bool) -> Self {
            Self {
                calls: Arc::new(AtomicU32::new(0)),
                failures,
                permanent,
                dead_lettered: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    #[async_trait]
    impl EventHandler for FlakyHandler {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn handle(&self, _envelope: &EventEnvelope) -> std::result::Result<(), HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                if self.permanent {
                    return Err(HandlerError::Permanent("rejected".into()));
                }
                return Err(HandlerError::Transient("flaky".into()));
            }
            Ok(())
        }

        async fn on_dead_letter(&self, _envelope: &EventEnvelope, _error: &HandlerError) {
            self.dead_lettered.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..2000 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_to_every_subscribed_group() {
        let bus = InMemoryEventBus::new();
        let h1 = Arc::new(FlakyHandler::new(0, false));
        let h2 = Arc::new(FlakyHandler::new(0, false));

        bus.subscribe("TestEvent", "group-a", h1.clone(), SubscribeOptions::default())
            .await
            .unwrap();
        bus.subscribe("TestEvent", "group-b", h2.clone(), SubscribeOptions::default())
            .await
            .unwrap();

        bus.publish(test_envelope()).await.unwrap();

        let c1 = h1.calls.clone();
        let c2 = h2.calls.clone();
        wait_until(move || c1.load(Ordering::SeqCst) == 1 && c2.load(Ordering::SeqCst) == 1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn retains_publishes_until_first_subscriber() {
        let bus = InMemoryEventBus::new();
        bus.publish(test_envelope()).await.unwrap();
        bus.publish(test_envelope()).await.unwrap();

        let handler = Arc::new(FlakyHandler::new(0, false));
        bus.subscribe(
            "TestEvent",
            "late-group",
            handler.clone(),
            SubscribeOptions::default(),
        )
        .await
        .unwrap();

        let calls = handler.calls.clone();
        wait_until(move || calls.load(Ordering::SeqCst) == 2).await;
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let bus = InMemoryEventBus::new();
        let handler = Arc::new(FlakyHandler::new(2, false));
        let options = SubscribeOptions::with_retry(RetryPolicy::new(
            5,
            Duration::from_millis(10),
            Duration::from_secs(1),
        ));

        bus.subscribe("TestEvent", "group", handler.clone(), options)
            .await
            .unwrap();
        bus.publish(test_envelope()).await.unwrap();

        let calls = handler.calls.clone();
        wait_until(move || calls.load(Ordering::SeqCst) == 3).await;
        assert!(bus.dead_letters().await.is_empty());
        assert_eq!(handler.dead_lettered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_dead_letters_without_retry() {
        let bus = InMemoryEventBus::new();
        let handler = Arc::new(FlakyHandler::new(u32::MAX, true));

        bus.subscribe("TestEvent", "group", handler.clone(), SubscribeOptions::default())
            .await
            .unwrap();
        bus.publish(test_envelope()).await.unwrap();

        let flagged = handler.dead_lettered.clone();
        wait_until(move || flagged.load(Ordering::SeqCst) == 1).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        let dead = bus.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 1);
        assert_eq!(dead[0].handler, "flaky");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_dead_letter() {
        let bus = InMemoryEventBus::new();
        let handler = Arc::new(FlakyHandler::new(u32::MAX, false));
        let options = SubscribeOptions::with_retry(RetryPolicy::new(
            3,
            Duration::from_millis(10),
            Duration::from_secs(1),
        ));

        bus.subscribe("TestEvent", "group", handler.clone(), options)
            .await
            .unwrap();
        bus.publish(test_envelope()).await.unwrap();

        let flagged = handler.dead_lettered.clone();
        wait_until(move || flagged.load(Ordering::SeqCst) == 1).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        let dead = bus.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn handler_timeout_counts_as_transient() {
        struct SlowHandler;

        #[async_trait]
        impl EventHandler for SlowHandler {
            fn name(&self) -> &'static str {
                "slow"
            }

            async fn handle(
                &self,
                _envelope: &EventEnvelope,
            ) -> std::result::Result<(), HandlerError> {
                tokio::time::sleep(Duration::from_secs(300)).await;
                Ok(())
            }
        }

        let bus = InMemoryEventBus::new();
        let options = SubscribeOptions {
            retry: RetryPolicy::new(2, Duration::from_millis(10), Duration::from_secs(1)),
            max_in_flight: 1,
            handler_timeout: Duration::from_millis(100),
        };

        bus.subscribe("TestEvent", "group", Arc::new(SlowHandler), options)
            .await
            .unwrap();
        bus.publish(test_envelope()).await.unwrap();

        for _ in 0..2000 {
            if !bus.dead_letters().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let dead = bus.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 2);
        assert!(dead[0].error.contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn max_in_flight_bounds_concurrency() {
        struct ConcurrencyProbe {
            current: AtomicUsize,
            observed_max: AtomicUsize,
            done: AtomicUsize,
        }

        #[async_trait]
        impl EventHandler for ConcurrencyProbe {
            fn name(&self) -> &'static str {
                "probe"
            }

            async fn handle(
                &self,
                _envelope: &EventEnvelope,
            ) -> std::result::Result<(), HandlerError> {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.observed_max.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.current.fetch_sub(1, Ordering::SeqCst);
                self.done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let bus = InMemoryEventBus::new();
        let probe = Arc::new(ConcurrencyProbe {
            current: AtomicUsize::new(0),
            observed_max: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
        });
        let options = SubscribeOptions {
            retry: RetryPolicy::no_retries(),
            max_in_flight: 2,
            handler_timeout: Duration::from_secs(5),
        };

        bus.subscribe("TestEvent", "group", probe.clone(), options)
            .await
            .unwrap();
        for _ in 0..8 {
            bus.publish(test_envelope()).await.unwrap();
        }

        let done = Arc::clone(&probe);
        wait_until(move || done.done.load(Ordering::SeqCst) == 8).await;
        assert!(probe.observed_max.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn duplicate_group_subscription_is_rejected() {
        let bus = InMemoryEventBus::new();
        let handler = Arc::new(FlakyHandler::new(0, false));

        bus.subscribe("TestEvent", "group", handler.clone(), SubscribeOptions::default())
            .await
            .unwrap();
        let result = bus
            .subscribe("TestEvent", "group", handler, SubscribeOptions::default())
            .await;

        assert!(matches!(
            result,
            Err(BusError::DuplicateSubscription { .. })
        ));
    }

    #[tokio::test]
    async fn publish_after_close_fails() {
        let bus = InMemoryEventBus::new();
        bus.close().await;
        let result = bus.publish(test_envelope()).await;
        assert!(matches!(result, Err(BusError::Closed)));
    }
}
