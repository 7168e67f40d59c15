//! Integration tests for the API server.
//!
//! Requests are driven straight through the router; behind it the full
//! choreography runs on the in-memory bus with provider doubles.

use std::sync::OnceLock;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn setup() -> axum::Router {
    let config = api::Config::default();
    let (state, _bus, _providers) = api::create_default_state(&config).await;
    api::create_app(state, get_metrics_handle())
}

fn create_request(key: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/job")
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("X-Idempotency-Key", key);
    }
    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn trip_body() -> serde_json::Value {
    serde_json::json!({
        "StartingAddress": "Unter den Linden 1, Berlin",
        "DestinationAddress": "Marienplatz 8, Munich",
        "Email": "traveler@example.com"
    })
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = setup().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_create_job() {
    let app = setup().await;

    let response = app
        .oneshot(create_request(Some("key-1"), trip_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = json_body(response).await;
    assert!(json["JobId"].as_str().is_some());
}

#[tokio::test]
async fn test_create_job_without_idempotency_key() {
    let app = setup().await;

    let response = app.oneshot(create_request(None, trip_body())).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_job_with_malformed_email() {
    let app = setup().await;

    let body = serde_json::json!({
        "StartingAddress": "A",
        "DestinationAddress": "B",
        "Email": "not-an-email"
    });
    let response = app.oneshot(create_request(Some("key-1"), body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_repeated_create_returns_the_same_job() {
    let app = setup().await;

    let first = app
        .clone()
        .oneshot(create_request(Some("key-1"), trip_body()))
        .await
        .unwrap();
    let second = app
        .oneshot(create_request(Some("key-1"), trip_body()))
        .await
        .unwrap();

    let first_id = json_body(first).await["JobId"].as_str().unwrap().to_string();
    let second_id = json_body(second).await["JobId"].as_str().unwrap().to_string();
    assert_eq!(first_id, second_id);
}

#[tokio::test]
async fn test_create_and_poll_until_sent() {
    let app = setup().await;

    let create_response = app
        .clone()
        .oneshot(create_request(Some("key-1"), trip_body()))
        .await
        .unwrap();
    assert_eq!(create_response.status(), StatusCode::CREATED);
    let job_id = json_body(create_response).await["JobId"]
        .as_str()
        .unwrap()
        .to_string();

    // The saga runs in the background; poll the read path until terminal.
    let mut status = String::new();
    for _ in 0..600 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/job/{job_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        status = json_body(response).await["Status"]
            .as_str()
            .unwrap()
            .to_string();
        if status == "Sent" || status == "Failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(status, "Sent");
}

#[tokio::test]
async fn test_get_nonexistent_job() {
    let app = setup().await;
    let fake_id = uuid::Uuid::new_v4();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/job/{fake_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_job_id_format() {
    let app = setup().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/job/not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
