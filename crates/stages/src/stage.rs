//! Shared plumbing for stage handlers.

use domain::TravelEvent;
use event_bus::{EventEnvelope, HandlerError};
use registry::RegistryError;

/// Decodes the envelope payload; an undecodable payload can never succeed
/// and is dead-lettered immediately.
pub(crate) fn parse_event(envelope: &EventEnvelope) -> Result<TravelEvent, HandlerError> {
    TravelEvent::from_envelope(envelope)
        .map_err(|e| HandlerError::Permanent(format!("undecodable event payload: {e}")))
}

/// Maps registry failures onto delivery semantics: a missing job cannot be
/// fixed by retrying, everything else (store I/O, bus publish) might.
pub(crate) fn registry_error(e: RegistryError) -> HandlerError {
    match e {
        RegistryError::NotFound(id) => HandlerError::Permanent(format!("job not found: {id}")),
        other => HandlerError::Transient(other.to_string()),
    }
}

/// Maps a publish failure; the broker may come back.
pub(crate) fn publish_error(e: event_bus::BusError) -> HandlerError {
    HandlerError::Transient(e.to_string())
}
