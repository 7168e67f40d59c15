use thiserror::Error;

/// Errors that can occur when interacting with the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// A consumer group is already subscribed to the topic.
    #[error("topic '{topic}' already has a subscription for group '{group}'")]
    DuplicateSubscription { topic: String, group: String },

    /// The bus has been closed and no longer accepts publishes.
    #[error("event bus is closed")]
    Closed,

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
