//! Geocoding provider trait and deterministic test double.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{Coordinates, JobId};

use super::ProviderError;

/// Resolves a postal address to coordinates.
#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    /// Resolves `address`, tagging the upstream call with the job id.
    async fn geocode(
        &self,
        address: &str,
        correlation_id: JobId,
    ) -> Result<Coordinates, ProviderError>;
}

#[derive(Debug, Default)]
struct State {
    table: HashMap<String, Coordinates>,
    fail_addresses: HashSet<String>,
    transient_failures_remaining: u32,
    calls: u32,
}

/// In-memory geocoding provider for testing.
///
/// Known addresses come from the keyed table; unknown ones fall back to a
/// deterministic generator so any address resolves to stable coordinates.
#[derive(Debug, Clone, Default)]
pub struct StaticGeocodingProvider {
    state: Arc<RwLock<State>>,
}

impl StaticGeocodingProvider {
    /// Creates a new provider with an empty lookup table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins an address to fixed coordinates.
    pub fn insert(&self, address: impl Into<String>, coordinates: Coordinates) {
        self.state
            .write()
            .unwrap()
            .table
            .insert(address.into(), coordinates);
    }

    /// Makes the given address fail permanently (unresolvable).
    pub fn set_fail_for(&self, address: impl Into<String>) {
        self.state
            .write()
            .unwrap()
            .fail_addresses
            .insert(address.into());
    }

    /// Makes the next `n` calls fail transiently.
    pub fn set_fail_transiently(&self, n: u32) {
        self.state.write().unwrap().transient_failures_remaining = n;
    }

    /// Returns the number of upstream calls made.
    pub fn call_count(&self) -> u32 {
        self.state.read().unwrap().calls
    }

    fn fallback(address: &str) -> Coordinates {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        address.hash(&mut hasher);
        let h = hasher.finish();
        let latitude = ((h >> 32) % 180_000) as f64 / 1_000.0 - 90.0;
        let longitude = (h % 360_000) as f64 / 1_000.0 - 180.0;
        Coordinates::new(latitude, longitude)
    }
}

#[async_trait]
impl GeocodingProvider for StaticGeocodingProvider {
    async fn geocode(
        &self,
        address: &str,
        _correlation_id: JobId,
    ) -> Result<Coordinates, ProviderError> {
        let mut state = self.state.write().unwrap();
        state.calls += 1;

        if state.transient_failures_remaining > 0 {
            state.transient_failures_remaining -= 1;
            return Err(ProviderError::Transient("geocoder unavailable".to_string()));
        }

        if state.fail_addresses.contains(address) {
            return Err(ProviderError::Permanent(format!(
                "could not resolve address '{address}'"
            )));
        }

        Ok(state
            .table
            .get(address)
            .copied()
            .unwrap_or_else(|| Self::fallback(address)))
    }
}
