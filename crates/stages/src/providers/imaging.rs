//! Imaging provider trait and in-memory test double.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::Coordinates;
use domain::ImageReference;

use super::ProviderError;

/// Finds a representative image for the destination.
///
/// `Ok(None)` is a valid success: some destinations simply have no image.
#[async_trait]
pub trait ImagingProvider: Send + Sync {
    async fn find_image(
        &self,
        destination_address: &str,
        destination: Coordinates,
    ) -> Result<Option<ImageReference>, ProviderError>;
}

#[derive(Debug, Default)]
struct State {
    table: HashMap<String, ImageReference>,
    no_image_addresses: HashSet<String>,
    fail_on_find: bool,
    transient_failures_remaining: u32,
    calls: u32,
}

/// In-memory imaging provider for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryImagingProvider {
    state: Arc<RwLock<State>>,
}

impl InMemoryImagingProvider {
    /// Creates a new provider with an empty lookup table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins an address to a fixed image.
    pub fn insert(&self, address: impl Into<String>, image: ImageReference) {
        self.state.write().unwrap().table.insert(address.into(), image);
    }

    /// Makes the given address resolve to "no image available".
    pub fn set_no_image_for(&self, address: impl Into<String>) {
        self.state
            .write()
            .unwrap()
            .no_image_addresses
            .insert(address.into());
    }

    /// Configures the provider to fail permanently on every call.
    pub fn set_fail_on_find(&self, fail: bool) {
        self.state.write().unwrap().fail_on_find = fail;
    }

    /// Makes the next `n` calls fail transiently.
    pub fn set_fail_transiently(&self, n: u32) {
        self.state.write().unwrap().transient_failures_remaining = n;
    }

    /// Returns the number of upstream calls made.
    pub fn call_count(&self) -> u32 {
        self.state.read().unwrap().calls
    }

    fn fallback(destination_address: &str) -> ImageReference {
        let slug: String = destination_address
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        ImageReference {
            url: format!("https://images.example/{slug}.jpg"),
            attribution: None,
        }
    }
}

#[async_trait]
impl ImagingProvider for InMemoryImagingProvider {
    async fn find_image(
        &self,
        destination_address: &str,
        _destination: Coordinates,
    ) -> Result<Option<ImageReference>, ProviderError> {
        let mut state = self.state.write().unwrap();
        state.calls += 1;

        if state.transient_failures_remaining > 0 {
            state.transient_failures_remaining -= 1;
            return Err(ProviderError::Transient(
                "image service unavailable".to_string(),
            ));
        }

        if state.fail_on_find {
            return Err(ProviderError::Permanent("image search failed".to_string()));
        }

        if state.no_image_addresses.contains(destination_address) {
            return Ok(None);
        }

        Ok(Some(
            state
                .table
                .get(destination_address)
                .cloned()
                .unwrap_or_else(|| Self::fallback(destination_address)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pinned_image_is_returned() {
        let provider = InMemoryImagingProvider::new();
        let image = ImageReference {
            url: "https://images.example/munich.jpg".into(),
            attribution: Some("City archive".into()),
        };
        provider.insert("Munich", image.clone());

        let result = provider
            .find_image("Munich", Coordinates::new(48.137, 11.575))
            .await
            .unwrap();
        assert_eq!(result, Some(image));
    }

    #[tokio::test]
    async fn missing_image_is_a_valid_success() {
        let provider = InMemoryImagingProvider::new();
        provider.set_no_image_for("Nowhere");

        let result = provider
            .find_image("Nowhere", Coordinates::new(0.0, 0.0))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn fallback_builds_a_slug_url() {
        let provider = InMemoryImagingProvider::new();
        let result = provider
            .find_image("Main St 5", Coordinates::new(0.0, 0.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.url, "https://images.example/main-st-5.jpg");
    }

    #[tokio::test]
    async fn fail_on_find_is_permanent() {
        let provider = InMemoryImagingProvider::new();
        provider.set_fail_on_find(true);

        let result = provider.find_image("Munich", Coordinates::new(0.0, 0.0)).await;
        assert!(matches!(result, Err(ProviderError::Permanent(_))));
    }
}
