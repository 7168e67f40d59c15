//! External provider call contracts and in-memory test doubles.
//!
//! The real integrations (mapping, weather, imaging, mail) live behind
//! these traits in separate adapter crates; the doubles here hold a keyed
//! lookup table plus a deterministic fallback generator and are owned by
//! whatever harness instantiates them.

pub mod directions;
pub mod email;
pub mod geocoding;
pub mod imaging;
pub mod weather;

use thiserror::Error;

pub use directions::{DirectionsProvider, InMemoryDirectionsProvider};
pub use email::{EmailSender, InMemoryEmailSender};
pub use geocoding::{GeocodingProvider, StaticGeocodingProvider};
pub use imaging::{ImagingProvider, InMemoryImagingProvider};
pub use weather::{InMemoryWeatherProvider, WeatherProvider};

/// Failure of an external provider call.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The call may succeed if repeated (network hiccup, rate limit).
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The provider rejected the request; retrying cannot help.
    #[error("permanent provider error: {0}")]
    Permanent(String),
}
