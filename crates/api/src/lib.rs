//! HTTP API server and consumer wiring for the trip-planning saga.
//!
//! Exposes the job intake and status-query endpoints with structured
//! logging (tracing) and Prometheus metrics, and wires every stage
//! processor onto the event bus as its own consumer group.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use cache::InMemoryTtlCache;
use domain::topics;
use event_bus::{EventBus, InMemoryEventBus, SubscribeOptions};
use metrics_exporter_prometheus::PrometheusHandle;
use query::{StatusCacheInvalidator, StatusQuery};
use registry::{
    InMemoryAggregationStore, InMemoryJobStore, JobIntake, JobRegistry, JobStore,
};
use stages::{
    DirectionsStage, EmailStage, FanInAggregator, GeocodeCache, GeocodingStage, ImagingStage,
    InMemoryDirectionsProvider, InMemoryEmailSender, InMemoryImagingProvider,
    InMemoryWeatherProvider, StaticGeocodingProvider, WeatherStage,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
use routes::jobs::AppState;

/// The in-memory provider doubles backing the default wiring, exposed so
/// demos and tests can pin lookups or inject failures.
#[derive(Clone)]
pub struct StageProviders {
    pub geocoding: StaticGeocodingProvider,
    pub directions: InMemoryDirectionsProvider,
    pub weather: InMemoryWeatherProvider,
    pub imaging: InMemoryImagingProvider,
    pub email: InMemoryEmailSender,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: JobStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/job", post(routes::jobs::create::<S>))
        .route("/job/{id}", get(routes::jobs::get::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the default application state: in-memory stores and providers,
/// with every stage subscribed to its topic as an independent consumer
/// group.
pub async fn create_default_state(
    config: &Config,
) -> (
    Arc<AppState<InMemoryJobStore>>,
    InMemoryEventBus,
    StageProviders,
) {
    let bus = InMemoryEventBus::new();
    let store = InMemoryJobStore::new();
    let aggregation = InMemoryAggregationStore::new();
    let registry = JobRegistry::new(store.clone(), bus.clone());

    let providers = StageProviders {
        geocoding: StaticGeocodingProvider::new(),
        directions: InMemoryDirectionsProvider::new(),
        weather: InMemoryWeatherProvider::new(),
        imaging: InMemoryImagingProvider::new(),
        email: InMemoryEmailSender::new(),
    };

    let options = SubscribeOptions::default();

    let geocoding_stage = GeocodingStage::new(
        registry.clone(),
        bus.clone(),
        GeocodeCache::new(
            InMemoryTtlCache::new("geocoding"),
            providers.geocoding.clone(),
            config.geocode_cache_ttl,
        ),
    );
    bus.subscribe(
        topics::JOB_CREATED,
        "geocoding",
        Arc::new(geocoding_stage),
        options.clone(),
    )
    .await
    .expect("subscribe geocoding stage");

    bus.subscribe(
        topics::LOCATIONS_READY,
        "directions",
        Arc::new(DirectionsStage::new(
            aggregation.clone(),
            bus.clone(),
            providers.directions.clone(),
        )),
        options.clone(),
    )
    .await
    .expect("subscribe directions stage");
    bus.subscribe(
        topics::LOCATIONS_READY,
        "weather",
        Arc::new(WeatherStage::new(
            aggregation.clone(),
            bus.clone(),
            providers.weather.clone(),
        )),
        options.clone(),
    )
    .await
    .expect("subscribe weather stage");
    bus.subscribe(
        topics::LOCATIONS_READY,
        "imaging",
        Arc::new(ImagingStage::new(
            aggregation.clone(),
            bus.clone(),
            providers.imaging.clone(),
        )),
        options.clone(),
    )
    .await
    .expect("subscribe imaging stage");

    let aggregator = Arc::new(FanInAggregator::new(
        aggregation.clone(),
        registry.clone(),
        bus.clone(),
    ));
    for topic in [
        topics::DIRECTIONS_READY,
        topics::WEATHER_READY,
        topics::IMAGE_READY,
    ] {
        bus.subscribe(topic, "aggregation", aggregator.clone(), options.clone())
            .await
            .expect("subscribe fan-in aggregator");
    }

    bus.subscribe(
        topics::PROCESSING_COMPLETE,
        "email",
        Arc::new(EmailStage::new(registry.clone(), providers.email.clone())),
        options.clone(),
    )
    .await
    .expect("subscribe email stage");

    let status = StatusQuery::new(
        store.clone(),
        InMemoryTtlCache::new("status"),
        config.status_cache_ttl,
    );
    bus.subscribe(
        topics::JOB_STATUS_UPDATE,
        "status-cache",
        Arc::new(StatusCacheInvalidator::new(status.clone())),
        options,
    )
    .await
    .expect("subscribe status cache invalidator");

    let state = Arc::new(AppState {
        intake: JobIntake::new(store, bus.clone()),
        status,
    });

    (state, bus, providers)
}
