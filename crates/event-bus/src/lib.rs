//! Durable publish/subscribe transport for the trip-planning saga.
//!
//! The bus delivers every published event at least once to each consumer
//! group subscribed to its topic. Delivery order is guaranteed only within
//! a single group's queue; consumers must tolerate duplicates and
//! out-of-order arrival across topics.

pub mod bus;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod retry;

pub use bus::{EventBus, EventHandler, HandlerError, SubscribeOptions};
pub use common::{EventId, JobId};
pub use envelope::{EventEnvelope, EventEnvelopeBuilder};
pub use error::{BusError, Result};
pub use memory::{DeadLetter, InMemoryEventBus};
pub use retry::RetryPolicy;
