//! Job creation and status endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use cache::InMemoryTtlCache;
use common::JobId;
use domain::Job;
use event_bus::InMemoryEventBus;
use query::StatusQuery;
use registry::{JobIntake, JobStore};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: JobStore> {
    pub intake: JobIntake<S, InMemoryEventBus>,
    pub status: StatusQuery<S, InMemoryTtlCache<Job>>,
}

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateJobRequest {
    pub starting_address: String,
    pub destination_address: String,
    pub email: String,
}

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobCreatedResponse {
    pub job_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobStatusResponse {
    pub status: String,
    pub additional_information: Option<String>,
}

// -- Handlers --

/// POST /job — accept a travel-planning request.
///
/// Requires the `X-Idempotency-Key` header; repeated submissions with the
/// same key return the original job.
#[tracing::instrument(skip(state, headers, req))]
pub async fn create<S: JobStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<CreateJobRequest>,
) -> Result<(axum::http::StatusCode, Json<JobCreatedResponse>), ApiError> {
    let idempotency_key = headers
        .get("X-Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing X-Idempotency-Key header".to_string()))?;

    domain::validate_request(&req.starting_address, &req.destination_address, &req.email)?;

    let job_id = state
        .intake
        .create_job(
            idempotency_key,
            req.starting_address.trim(),
            req.destination_address.trim(),
            req.email.trim(),
        )
        .await?;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(JobCreatedResponse {
            job_id: job_id.to_string(),
        }),
    ))
}

/// GET /job/{id} — return the job's current status.
#[tracing::instrument(skip(state))]
pub async fn get<S: JobStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job_id = parse_job_id(&id)?;
    let job = state.status.get(job_id).await?;

    Ok(Json(JobStatusResponse {
        status: job.status.to_string(),
        additional_information: job.additional_information,
    }))
}

fn parse_job_id(id: &str) -> Result<JobId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid job id format: {e}")))?;
    Ok(JobId::from_uuid(uuid))
}
