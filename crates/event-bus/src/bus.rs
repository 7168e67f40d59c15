use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::envelope::EventEnvelope;
use crate::error::Result;
use crate::retry::RetryPolicy;

/// Error returned by an event handler for a single delivery.
///
/// Transient errors are retried with backoff per the subscription's
/// [`RetryPolicy`]; permanent errors go straight to the dead-letter path.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// The failure may resolve on its own (provider hiccup, timeout).
    #[error("transient failure: {0}")]
    Transient(String),

    /// Retrying will not help (bad payload, provider rejected the request).
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    /// Returns true if this error should be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }
}

/// A consumer of one or more event types.
///
/// Handlers must be idempotent: the bus guarantees at-least-once delivery,
/// so the same envelope may arrive more than once, possibly concurrently
/// on different consumer instances.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs, metrics and dead-letter records.
    fn name(&self) -> &'static str;

    /// Processes a single delivery.
    ///
    /// Returning `Ok(())` acknowledges the message. A state change must be
    /// committed before any follow-on event is published from inside this
    /// method (causal ordering is the handler's responsibility).
    async fn handle(&self, envelope: &EventEnvelope) -> std::result::Result<(), HandlerError>;

    /// Called once when a delivery exhausts its retries or fails permanently,
    /// after the envelope has been recorded on the dead-letter queue.
    async fn on_dead_letter(&self, _envelope: &EventEnvelope, _error: &HandlerError) {}
}

/// Per-subscription delivery options.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Retry/backoff policy for transient failures.
    pub retry: RetryPolicy,
    /// Maximum number of deliveries processed concurrently by this
    /// subscription (admission control for downstream providers).
    pub max_in_flight: usize,
    /// Upper bound on a single handler invocation; an elapsed timeout
    /// counts as a transient failure.
    pub handler_timeout: Duration,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_in_flight: 16,
            handler_timeout: Duration::from_secs(30),
        }
    }
}

impl SubscribeOptions {
    /// Creates options with the given retry policy and defaults otherwise.
    pub fn with_retry(retry: RetryPolicy) -> Self {
        Self {
            retry,
            ..Self::default()
        }
    }
}

/// Core trait for event bus implementations.
///
/// A bus delivers each published envelope at least once to every consumer
/// group subscribed to the envelope's topic (its event type). There is no
/// ordering guarantee across topics; within a group, deliveries are pulled
/// from a single queue.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes an envelope to its topic.
    async fn publish(&self, envelope: EventEnvelope) -> Result<()>;

    /// Registers `handler` as consumer group `group` on `topic`.
    ///
    /// Each (topic, group) pair may be subscribed once; the bus spawns a
    /// dispatch loop that survives until the bus is closed.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        handler: std::sync::Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Result<()>;
}
