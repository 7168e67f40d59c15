//! Email sender trait and in-memory test double.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::JobId;

use super::ProviderError;

/// The rendered notification handed to the mail adapter.
///
/// HTML templating is an adapter concern; the core assembles plain text.
#[derive(Debug, Clone, PartialEq)]
pub struct TripSummary {
    pub job_id: JobId,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Dispatches the trip summary to the recipient.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, summary: &TripSummary) -> Result<(), ProviderError>;
}

#[derive(Debug, Default)]
struct State {
    sent: Vec<TripSummary>,
    fail_on_send: bool,
    transient_failures_remaining: u32,
}

/// In-memory email sender for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEmailSender {
    state: Arc<RwLock<State>>,
}

impl InMemoryEmailSender {
    /// Creates a new sender.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the sender to fail permanently on every call.
    pub fn set_fail_on_send(&self, fail: bool) {
        self.state.write().unwrap().fail_on_send = fail;
    }

    /// Makes the next `n` calls fail transiently.
    pub fn set_fail_transiently(&self, n: u32) {
        self.state.write().unwrap().transient_failures_remaining = n;
    }

    /// Returns the number of summaries dispatched.
    pub fn sent_count(&self) -> usize {
        self.state.read().unwrap().sent.len()
    }

    /// Returns the most recently dispatched summary.
    pub fn last_sent(&self) -> Option<TripSummary> {
        self.state.read().unwrap().sent.last().cloned()
    }
}

#[async_trait]
impl EmailSender for InMemoryEmailSender {
    async fn send(&self, summary: &TripSummary) -> Result<(), ProviderError> {
        let mut state = self.state.write().unwrap();

        if state.transient_failures_remaining > 0 {
            state.transient_failures_remaining -= 1;
            return Err(ProviderError::Transient("smtp unavailable".to_string()));
        }

        if state.fail_on_send {
            return Err(ProviderError::Permanent("recipient rejected".to_string()));
        }

        state.sent.push(summary.clone());
        Ok(())
    }
}
