//! Directions provider trait and in-memory test double.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::Coordinates;
use domain::RoutePlan;

use super::ProviderError;

/// Computes driving directions between two coordinates.
#[async_trait]
pub trait DirectionsProvider: Send + Sync {
    async fn plan_route(
        &self,
        start: Coordinates,
        destination: Coordinates,
    ) -> Result<RoutePlan, ProviderError>;
}

#[derive(Debug, Default)]
struct State {
    table: HashMap<(Coordinates, Coordinates), RoutePlan>,
    fail_on_plan: bool,
    transient_failures_remaining: u32,
    calls: u32,
}

/// In-memory directions provider for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectionsProvider {
    state: Arc<RwLock<State>>,
}

impl InMemoryDirectionsProvider {
    /// Creates a new provider with an empty lookup table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins a coordinate pair to a fixed route.
    pub fn insert(&self, start: Coordinates, destination: Coordinates, plan: RoutePlan) {
        self.state
            .write()
            .unwrap()
            .table
            .insert((start, destination), plan);
    }

    /// Configures the provider to fail permanently on every call.
    pub fn set_fail_on_plan(&self, fail: bool) {
        self.state.write().unwrap().fail_on_plan = fail;
    }

    /// Makes the next `n` calls fail transiently.
    pub fn set_fail_transiently(&self, n: u32) {
        self.state.write().unwrap().transient_failures_remaining = n;
    }

    /// Returns the number of upstream calls made.
    pub fn call_count(&self) -> u32 {
        self.state.read().unwrap().calls
    }

    fn fallback(start: Coordinates, destination: Coordinates) -> RoutePlan {
        // Rough equirectangular distance; good enough for a synthetic plan.
        let dlat = destination.latitude - start.latitude;
        let dlon = destination.longitude - start.longitude;
        let distance_meters = ((dlat * dlat + dlon * dlon).sqrt() * 111_000.0).round() as u64;
        let duration_seconds = distance_meters / 14;
        RoutePlan {
            summary: format!("{start} to {destination}"),
            distance_meters,
            duration_seconds,
            steps: vec![
                format!("Depart from {start}"),
                format!("Arrive at {destination}"),
            ],
        }
    }
}

#[async_trait]
impl DirectionsProvider for InMemoryDirectionsProvider {
    async fn plan_route(
        &self,
        start: Coordinates,
        destination: Coordinates,
    ) -> Result<RoutePlan, ProviderError> {
        let mut state = self.state.write().unwrap();
        state.calls += 1;

        if state.transient_failures_remaining > 0 {
            state.transient_failures_remaining -= 1;
            return Err(ProviderError::Transient(
                "directions service unavailable".to_string(),
            ));
        }

        if state.fail_on_plan {
            return Err(ProviderError::Permanent("no route found".to_string()));
        }

        Ok(state
            .table
            .get(&(start, destination))
            .cloned()
            .unwrap_or_else(|| Self::fallback(start, destination)))
    }
}
