//! Job lifecycle handlers: create, status, convert, delete.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mediaconv_core::models::JobStatus;
use mediaconv_services::JobStatusReport;

use crate::error::HttpAppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateJobRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobCreatedResponse {
    pub id: Uuid,
    pub name: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct JobAcceptedResponse {
    pub id: Uuid,
    pub message: &'static str,
}

#[tracing::instrument(skip(state, request), fields(operation = "create_job"))]
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobCreatedResponse>), HttpAppError> {
    let job = state.service.create_job(request.name).await?;
    Ok((
        StatusCode::CREATED,
        Json(JobCreatedResponse {
            id: job.id,
            name: job.display_name(),
            status: job.status,
        }),
    ))
}

#[tracing::instrument(skip(state), fields(operation = "get_status"))]
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobStatusReport>, HttpAppError> {
    Ok(Json(state.service.get_status(id).await?))
}

#[tracing::instrument(skip(state), fields(operation = "start_conversion"))]
pub async fn start_conversion(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobAcceptedResponse>), HttpAppError> {
    state.service.start_conversion(id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobAcceptedResponse {
            id,
            message: "Conversion started",
        }),
    ))
}

/// Returns as soon as teardown is queued.
#[tracing::instrument(skip(state), fields(operation = "delete_job"))]
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobAcceptedResponse>), HttpAppError> {
    state.service.delete_job(id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobAcceptedResponse {
            id,
            message: "Deletion queued",
        }),
    ))
}
