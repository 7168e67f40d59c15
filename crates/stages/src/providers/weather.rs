//! Weather provider trait and in-memory test double.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::Coordinates;
use domain::Forecast;

use super::ProviderError;

/// Produces a forecast for the destination.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn forecast(&self, destination: Coordinates) -> Result<Forecast, ProviderError>;
}

#[derive(Debug, Default)]
struct State {
    table: HashMap<Coordinates, Forecast>,
    fail_on_forecast: bool,
    transient_failures_remaining: u32,
    calls: u32,
}

/// In-memory weather provider for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWeatherProvider {
    state: Arc<RwLock<State>>,
}

impl InMemoryWeatherProvider {
    /// Creates a new provider with an empty lookup table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins coordinates to a fixed forecast.
    pub fn insert(&self, destination: Coordinates, forecast: Forecast) {
        self.state
            .write()
            .unwrap()
            .table
            .insert(destination, forecast);
    }

    /// Configures the provider to fail permanently on every call.
    pub fn set_fail_on_forecast(&self, fail: bool) {
        self.state.write().unwrap().fail_on_forecast = fail;
    }

    /// Makes the next `n` calls fail transiently.
    pub fn set_fail_transiently(&self, n: u32) {
        self.state.write().unwrap().transient_failures_remaining = n;
    }

    /// Returns the number of upstream calls made.
    pub fn call_count(&self) -> u32 {
        self.state.read().unwrap().calls
    }

    fn fallback(destination: Coordinates) -> Forecast {
        const DESCRIPTIONS: [&str; 4] = ["clear skies", "partly cloudy", "light rain", "overcast"];
        let bits = destination.latitude.to_bits() ^ destination.longitude.to_bits();
        let description = DESCRIPTIONS[(bits % 4) as usize];
        let temperature_celsius = (bits % 35) as f64 - 5.0;
        Forecast {
            description: description.to_string(),
            temperature_celsius,
        }
    }
}

#[async_trait]
impl WeatherProvider for InMemoryWeatherProvider {
    async fn forecast(&self, destination: Coordinates) -> Result<Forecast, ProviderError> {
        let mut state = self.state.write().unwrap();
        state.calls += 1;

        if state.transient_failures_remaining > 0 {
            state.transient_failures_remaining -= 1;
            return Err(ProviderError::Transient(
                "weather service unavailable".to_string(),
            ));
        }

        if state.fail_on_forecast {
            return Err(ProviderError::Permanent(
                "no forecast for location".to_string(),
            ));
        }

        Ok(state
            .table
            .get(&destination)
            .cloned()
            .unwrap_or_else(|| Self::fallback(destination)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pinned_forecast_is_returned() {
        let provider = InMemoryWeatherProvider::new();
        let destination = Coordinates::new(48.137, 11.575);
        let forecast = Forecast {
            description: "snow".into(),
            temperature_celsius: -2.0,
        };
        provider.insert(destination, forecast.clone());

        let result = provider.forecast(destination).await.unwrap();
        assert_eq!(result, forecast);
    }

    #[tokio::test]
    async fn fallback_forecast_is_deterministic() {
        let provider = InMemoryWeatherProvider::new();
        let destination = Coordinates::new(1.25, 2.5);
        let a = provider.forecast(destination).await.unwrap();
        let b = provider.forecast(destination).await.unwrap();
        assert_eq!(a, b);
        assert!(!a.description.is_empty());
    }

    #[tokio::test]
    async fn fail_on_forecast_is_permanent() {
        let provider = InMemoryWeatherProvider::new();
        provider.set_fail_on_forecast(true);

        let result = provider.forecast(Coordinates::new(0.0, 0.0)).await;
        assert!(matches!(result, Err(ProviderError::Permanent(_))));
    }
}
